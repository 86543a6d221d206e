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

//! Shared components for haversack.

/// Configuration of the persistence subsystem.
pub mod config;
/// Structured error type.
pub mod error;
/// Owner arrival and departure signals.
pub mod event;
/// Envelope format tags.
pub mod format;
/// Owner identities.
pub mod identity;
/// Name to UUID resolution.
pub mod resolve;
/// Task spawner for blocking I/O and background tasks.
pub mod spawn;
