// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error handling facilities for the control plane
//!
//! For HTTP-level error handling, see Dropshot.

use crate::api::external::Name;
use crate::api::external::ResourceType;
use dropshot::HttpError;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// An error that can be generated within a control plane component
///
/// These may be generated while handling a client request or as part of
/// background operation.  When generated as part of an HTTP request, an
/// `Error` will be converted into an HTTP error as one of the last steps in
/// processing the request.  This allows most of the system to remain agnostic
/// to the transport with which the system communicates with clients.
#[derive(Clone, Debug, Deserialize, thiserror::Error, PartialEq, Serialize)]
pub enum Error {
    /// An object needed as part of this operation was not found.
    #[error("Object (of type {lookup_type:?}) not found: {type_name}")]
    ObjectNotFound { type_name: ResourceType, lookup_type: LookupType },
    /// An object already exists with the specified name or identifier.
    #[error("Object (of type {type_name:?}) already exists: {object_name}")]
    ObjectAlreadyExists { type_name: ResourceType, object_name: String },
    /// The request was well-formed, but the operation cannot be completed
    /// given the current state of the system.
    #[error("Invalid Request: {message}")]
    InvalidRequest { message: String },
    /// The specified input field is not valid.
    #[error("Invalid Value: {label}, {message}")]
    InvalidValue { label: String, message: String },
    /// The operation conflicts with in-flight or existing state.  This is the
    /// variant behind the `AlreadyInFlight` rejection at the intake surface.
    #[error("Conflict: {message}")]
    Conflict { message: String },
    /// A shared resource pool (ports, server capacity) has no free capacity.
    /// Operator-actionable, never caused by the requesting tenant.
    #[error("Insufficient Capacity: {message}")]
    InsufficientCapacity { message: String, internal_message: String },

    /// The system encountered an unhandled operational error.
    #[error("Internal Error: {internal_message}")]
    InternalError { internal_message: String },
    /// The system (or part of it) is unavailable.
    #[error("Service Unavailable: {internal_message}")]
    ServiceUnavailable { internal_message: String },
}

/// Indicates how an object was looked up (for an `ObjectNotFound` error)
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum LookupType {
    /// a specific name was requested
    ByName(String),
    /// a specific id was requested
    ById(Uuid),
    /// a specific id was requested with some composite type
    /// (caller summarizes it)
    ByCompositeId(String),
}

impl LookupType {
    /// Returns an ObjectNotFound error appropriate for the case where this
    /// lookup failed
    pub fn into_not_found(self, type_name: ResourceType) -> Error {
        Error::ObjectNotFound { type_name, lookup_type: self }
    }
}

impl From<&str> for LookupType {
    fn from(name: &str) -> Self {
        LookupType::ByName(name.to_owned())
    }
}

impl From<&Name> for LookupType {
    fn from(name: &Name) -> Self {
        LookupType::from(name.as_str())
    }
}

impl From<Uuid> for LookupType {
    fn from(uuid: Uuid) -> Self {
        LookupType::ById(uuid)
    }
}

impl Error {
    /// Returns whether the error is likely transient and could reasonably be
    /// retried
    pub fn retryable(&self) -> bool {
        match self {
            Error::ServiceUnavailable { .. } => true,

            Error::ObjectNotFound { .. }
            | Error::ObjectAlreadyExists { .. }
            | Error::InvalidRequest { .. }
            | Error::InvalidValue { .. }
            | Error::Conflict { .. }
            | Error::InsufficientCapacity { .. }
            | Error::InternalError { .. } => false,
        }
    }

    /// Generates an [`Error::ObjectNotFound`] error for a lookup by object
    /// name.
    pub fn not_found_by_name(type_name: ResourceType, name: &Name) -> Error {
        LookupType::from(name).into_not_found(type_name)
    }

    /// Generates an [`Error::ObjectNotFound`] error for a lookup by object id.
    pub fn not_found_by_id(type_name: ResourceType, id: &Uuid) -> Error {
        LookupType::ById(*id).into_not_found(type_name)
    }

    /// Generates an [`Error::InternalError`] error with the specific message
    ///
    /// InternalError should be used for operational conditions that should not
    /// happen but that we cannot reasonably handle at runtime (e.g.,
    /// deserializing a value from the database, or finding two records for
    /// something that is supposed to be unique).
    pub fn internal_error(internal_message: &str) -> Error {
        Error::InternalError { internal_message: internal_message.to_owned() }
    }

    /// Generates an [`Error::InvalidRequest`] error with the specific message
    ///
    /// This should be used for failures due possibly to invalid client input
    /// or malformed requests.
    pub fn invalid_request(message: &str) -> Error {
        Error::InvalidRequest { message: message.to_owned() }
    }

    /// Generates an [`Error::InvalidValue`] error for the named input field.
    pub fn invalid_value(label: &str, message: impl ToString) -> Error {
        Error::InvalidValue {
            label: label.to_owned(),
            message: message.to_string(),
        }
    }

    /// Generates an [`Error::Conflict`] error with the specific message.
    pub fn conflict(message: impl ToString) -> Error {
        Error::Conflict { message: message.to_string() }
    }

    /// Generates an [`Error::InsufficientCapacity`] error.  `message` is
    /// shown to clients; `internal_message` carries the detail an operator
    /// needs.
    pub fn insufficient_capacity(
        message: &str,
        internal_message: &str,
    ) -> Error {
        Error::InsufficientCapacity {
            message: message.to_owned(),
            internal_message: internal_message.to_owned(),
        }
    }

    /// Generates an [`Error::ServiceUnavailable`] error with the specific
    /// message
    ///
    /// This should be used for transient failures where the caller might be
    /// expected to retry.  Logic errors or other problems indicating that a
    /// retry would not work should probably be an InternalError (if it's a
    /// server problem) or InvalidRequest (if it's a client problem) instead.
    pub fn unavail(message: &str) -> Error {
        Error::ServiceUnavailable { internal_message: message.to_owned() }
    }
}

impl From<Error> for HttpError {
    /// Converts an `Error` error into an `HttpError`.  This defines how
    /// errors that are represented internally using `Error` are ultimately
    /// exposed to clients over HTTP.
    fn from(error: Error) -> HttpError {
        match error {
            Error::ObjectNotFound { type_name: t, lookup_type: lt } => {
                let (lookup_field, lookup_value) = match lt {
                    LookupType::ByName(name) => ("name", name),
                    LookupType::ById(id) => ("id", id.to_string()),
                    LookupType::ByCompositeId(label) => ("id", label),
                };
                let message = format!(
                    "not found: {} with {} \"{}\"",
                    t, lookup_field, lookup_value
                );
                HttpError::for_client_error(
                    Some(String::from("ObjectNotFound")),
                    http::StatusCode::NOT_FOUND,
                    message,
                )
            }

            Error::ObjectAlreadyExists { type_name: t, object_name: n } => {
                let message = format!("already exists: {} \"{}\"", t, n);
                HttpError::for_bad_request(
                    Some(String::from("ObjectAlreadyExists")),
                    message,
                )
            }

            Error::InvalidRequest { message } => HttpError::for_bad_request(
                Some(String::from("InvalidRequest")),
                message,
            ),

            Error::InvalidValue { label, message } => {
                let message =
                    format!("unsupported value for \"{}\": {}", label, message);
                HttpError::for_bad_request(
                    Some(String::from("InvalidValue")),
                    message,
                )
            }

            Error::Conflict { message } => HttpError::for_client_error(
                Some(String::from("Conflict")),
                http::StatusCode::CONFLICT,
                message,
            ),

            Error::InsufficientCapacity { message, internal_message } => {
                HttpError {
                    status_code: http::StatusCode::SERVICE_UNAVAILABLE,
                    error_code: Some(String::from("InsufficientCapacity")),
                    external_message: format!(
                        "Insufficient capacity: {}",
                        message
                    ),
                    internal_message,
                }
            }

            Error::InternalError { internal_message } => {
                HttpError::for_internal_error(internal_message)
            }

            Error::ServiceUnavailable { internal_message } => {
                HttpError::for_unavail(
                    Some(String::from("ServiceNotAvailable")),
                    internal_message,
                )
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::internal_error(&e.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::Error;

    #[test]
    fn test_retryable() {
        assert!(Error::unavail("proxy reload failed").retryable());
        assert!(!Error::conflict("job already in flight").retryable());
        assert!(!Error::insufficient_capacity(
            "no free ports",
            "port range 8000-8001 exhausted"
        )
        .retryable());
    }
}
