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

use haversack_common::{
    error::{Error, ErrorKind, Result},
    format::FormatVersion,
};

use crate::payload::{Payload, Slot};

/// A serialized payload behind its 1-byte format tag.
///
/// The tag is kept raw, so envelopes read from storage can carry versions this build does not know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    version: u8,
    body: Vec<u8>,
}

impl Envelope {
    /// Create an envelope from a raw tag and body.
    pub fn new(version: u8, body: Vec<u8>) -> Self {
        Self { version, body }
    }

    /// The raw format tag.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// The version specific body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Tag byte followed by the body, without framing.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.body.len() + 1);
        buf.push(self.version);
        buf.extend_from_slice(&self.body);
        buf
    }

    /// Split a tag byte off the given bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        match buf.split_first() {
            Some((version, body)) => Ok(Self::new(*version, body.to_vec())),
            None => Err(Error::new(ErrorKind::Decode, "empty envelope")),
        }
    }
}

/// Converts payloads to and from envelopes.
///
/// New envelopes are written with the configured format version, every known version can be read.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeSerializer {
    used: FormatVersion,
}

impl EnvelopeSerializer {
    /// Create a serializer writing the given format version.
    pub fn new(used: FormatVersion) -> Self {
        Self { used }
    }

    /// The format version new envelopes are written with.
    pub fn used_format_version(&self) -> FormatVersion {
        self.used
    }

    /// Serialize a payload with the used format version.
    pub fn serialize(&self, payload: &Payload) -> Result<Envelope> {
        let mut body = Vec::new();
        match self.used {
            FormatVersion::V1 => {
                bincode::serialize_into(&mut body, payload.slots())?;
            }
            FormatVersion::V2 => {
                let mut encoder = zstd::Encoder::new(&mut body, 0)?;
                bincode::serialize_into(&mut encoder, payload.slots())?;
                encoder.finish()?;
            }
        }
        Ok(Envelope::new(self.used.to_u8(), body))
    }

    /// Deserialize a body written with the given raw format tag.
    pub fn deserialize(&self, body: &[u8], version: u8) -> Result<Payload> {
        // Decode from slices only, the slice reader checks length prefixes against the remaining bytes.
        let slots: Vec<Slot> = match FormatVersion::try_from_u8(version) {
            Some(FormatVersion::V1) => bincode::deserialize(body)?,
            Some(FormatVersion::V2) => {
                let raw = zstd::stream::decode_all(body)
                    .map_err(|e| Error::new(ErrorKind::Decode, "corrupt compressed body").with_source(e))?;
                bincode::deserialize(&raw)?
            }
            None => return Err(Error::unknown_format(version)),
        };
        Ok(Payload::from_slots(slots))
    }

    /// Deserialize an envelope.
    pub fn open(&self, envelope: &Envelope) -> Result<Payload> {
        self.deserialize(envelope.body(), envelope.version())
    }
}
