// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Envelope
//!
//! Every message travels as a JSON record `{ "id": "...", "msg": ... }`. The id
//! is generated once when the envelope is built and lives inside the body, so
//! retry bookkeeping survives any number of requeues even when the broker or a
//! proxy strips message properties.

use crate::errors::DecodeError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Anything that can be carried inside an [`Envelope`].
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Runtime type tag compared against an exchange's declared payload type.
pub fn type_tag<T: ?Sized>() -> &'static str {
    std::any::type_name::<T>()
}

/// The unit on the wire: a unique message id plus the business payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: String,
    #[serde(alias = "body")]
    pub msg: T,
}

impl<T: Payload> Envelope<T> {
    /// Wraps `msg` under a freshly generated id.
    pub fn new(msg: T) -> Self {
        Envelope {
            id: uuid::Uuid::new_v4().to_string(),
            msg,
        }
    }

    /// Serializes the envelope to its JSON wire form.
    ///
    /// # Errors
    /// Fails only when the payload's own `Serialize` impl fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parses wire bytes into an envelope of `T`.
    ///
    /// Both `msg` and the older `body` field name are accepted for the payload.
    ///
    /// # Errors
    /// `DecodeError::Malformed` when the bytes are not JSON, `id` or the payload
    /// is missing, or the payload does not map onto `T`; `DecodeError::BlankId`
    /// when the id is empty.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let envelope: Envelope<T> =
            serde_json::from_slice(bytes).map_err(|err| DecodeError::Malformed(err.to_string()))?;

        if envelope.id.trim().is_empty() {
            return Err(DecodeError::BlankId);
        }

        Ok(envelope)
    }
}
