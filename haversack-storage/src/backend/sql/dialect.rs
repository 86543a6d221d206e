// Copyright 2026 haversack Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

/// SQL dialects the sql backends can talk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// SQLite, `ON CONFLICT` upserts.
    Sqlite,
    /// MySQL or MariaDB, `ON DUPLICATE KEY` upserts.
    MySql,
}

impl Dialect {
    /// Map the database type reported by a connection pool to a dialect.
    pub fn from_database_type(database_type: &str) -> Option<Self> {
        match database_type.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            "mysql" | "mariadb" => Some(Self::MySql),
            _ => None,
        }
    }
}

/// Table names and statements of the sql backends.
#[derive(Debug, Clone)]
pub struct Statements {
    /// `CREATE TABLE` statements, in creation order.
    pub create: Vec<String>,
    /// `(owner_key)`, selects `(itemstacks, version)`.
    pub select_backpack: String,
    /// `(owner_key, itemstacks, version, last_update)`.
    pub upsert_backpack: String,
    /// `(new_key, old_key)`.
    pub rename_backpack: String,
    /// `(last_update)`, deletes older rows.
    pub purge_backpacks: String,
    /// `(uuid)`, selects `(owner_key)`.
    pub select_player_by_uuid: String,
    /// `(owner_key, name, uuid)`.
    pub upsert_player: String,
    /// `(owner_key)`.
    pub delete_player: String,
    /// `(owner_key)`, selects `(until)`.
    pub select_cooldown: String,
    /// `(owner_key, until)`.
    pub upsert_cooldown: String,
    /// `(new_key, old_key)`.
    pub rename_cooldown: String,
}

impl Statements {
    /// Build the statements of the given dialect for tables named with `prefix`.
    pub fn new(dialect: Dialect, prefix: &str) -> Self {
        let players = format!("{prefix}players");
        let backpacks = format!("{prefix}backpacks");
        let cooldowns = format!("{prefix}cooldowns");

        let (blob, suffix) = match dialect {
            Dialect::Sqlite => ("BLOB", ""),
            Dialect::MySql => ("MEDIUMBLOB", " ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"),
        };

        let create = vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {players} (owner_key VARCHAR(36) NOT NULL PRIMARY KEY, name VARCHAR(16) NOT NULL, uuid CHAR(36) NULL){suffix}"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {backpacks} (owner_key VARCHAR(36) NOT NULL PRIMARY KEY, itemstacks {blob} NOT NULL, version INTEGER NOT NULL, last_update BIGINT NOT NULL){suffix}"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {cooldowns} (owner_key VARCHAR(36) NOT NULL PRIMARY KEY, until BIGINT NOT NULL){suffix}"
            ),
        ];

        Self {
            create,
            select_backpack: format!("SELECT itemstacks, version FROM {backpacks} WHERE owner_key = ?"),
            upsert_backpack: upsert(
                dialect,
                &backpacks,
                &["owner_key", "itemstacks", "version", "last_update"],
            ),
            rename_backpack: format!("UPDATE {backpacks} SET owner_key = ? WHERE owner_key = ?"),
            purge_backpacks: format!("DELETE FROM {backpacks} WHERE last_update < ?"),
            select_player_by_uuid: format!("SELECT owner_key FROM {players} WHERE uuid = ?"),
            upsert_player: upsert(dialect, &players, &["owner_key", "name", "uuid"]),
            delete_player: format!("DELETE FROM {players} WHERE owner_key = ?"),
            select_cooldown: format!("SELECT until FROM {cooldowns} WHERE owner_key = ?"),
            upsert_cooldown: upsert(dialect, &cooldowns, &["owner_key", "until"]),
            rename_cooldown: format!("UPDATE {cooldowns} SET owner_key = ? WHERE owner_key = ?"),
        }
    }
}

/// Insert a row keyed by the first column, or update the other columns of the existing row.
fn upsert(dialect: Dialect, table: &str, columns: &[&str]) -> String {
    let names = columns.join(", ");
    let placeholders = vec!["?"; columns.len()].join(", ");
    let updates = |f: fn(&str) -> String| columns[1..].iter().map(|c| f(c)).collect::<Vec<_>>().join(", ");
    match dialect {
        Dialect::Sqlite => format!(
            "INSERT INTO {table} ({names}) VALUES ({placeholders}) ON CONFLICT({}) DO UPDATE SET {}",
            columns[0],
            updates(|c| format!("{c} = excluded.{c}"))
        ),
        Dialect::MySql => format!(
            "INSERT INTO {table} ({names}) VALUES ({placeholders}) ON DUPLICATE KEY UPDATE {}",
            updates(|c| format!("{c} = VALUES({c})"))
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_database_type() {
        assert_eq!(Dialect::from_database_type("SQLite"), Some(Dialect::Sqlite));
        assert_eq!(Dialect::from_database_type("MariaDB"), Some(Dialect::MySql));
        assert_eq!(Dialect::from_database_type("postgres"), None);
    }

    #[test]
    fn test_upsert() {
        assert_eq!(
            Statements::new(Dialect::Sqlite, "hs_").upsert_cooldown,
            "INSERT INTO hs_cooldowns (owner_key, until) VALUES (?, ?) ON CONFLICT(owner_key) DO UPDATE SET until = excluded.until"
        );
        assert_eq!(
            Statements::new(Dialect::MySql, "hs_").upsert_player,
            "INSERT INTO hs_players (owner_key, name, uuid) VALUES (?, ?, ?) ON DUPLICATE KEY UPDATE name = VALUES(name), uuid = VALUES(uuid)"
        );
    }
}
