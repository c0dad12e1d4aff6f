// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error handling and conversions.

use diesel::result::DatabaseErrorInformation;
use diesel::result::DatabaseErrorKind as DieselErrorKind;
use diesel::result::Error as DieselError;
use emporos_common::api::external::{
    Error as PublicError, LookupType, ResourceType,
};

/// Describes how to handle non-success results from the database.
pub enum ErrorHandler<'a> {
    /// The call failed during a lookup; a `NotFound` from the database maps
    /// to `ObjectNotFound` for the given resource.
    NotFoundByLookup(ResourceType, LookupType),
    /// The call failed during a creation; a unique-constraint violation maps
    /// to `ObjectAlreadyExists` for the given resource.
    Conflict(ResourceType, &'a str),
    /// Any error is treated as an internal server failure.
    Server,
}

/// Summarizes details provided with a database error.
fn format_database_error(
    kind: DieselErrorKind,
    info: &dyn DatabaseErrorInformation,
) -> String {
    let mut rv =
        format!("database error (kind = {:?}): {}\n", kind, info.message());
    if let Some(details) = info.details() {
        rv.push_str(&format!("DETAILS: {}\n", details));
    }
    if let Some(hint) = info.hint() {
        rv.push_str(&format!("HINT: {}\n", hint));
    }
    if let Some(table_name) = info.table_name() {
        rv.push_str(&format!("TABLE NAME: {}\n", table_name));
    }
    if let Some(constraint_name) = info.constraint_name() {
        rv.push_str(&format!("CONSTRAINT NAME: {}\n", constraint_name));
    }
    rv
}

/// Like [`diesel::result::OptionalExtension::optional`]. This turns Ok(v)
/// into Ok(Some(v)), Err("NotFound") into Ok(None), and leaves all other
/// values unchanged.
pub fn diesel_result_optional<T>(
    result: Result<T, DieselError>,
) -> Result<Option<T>, DieselError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(DieselError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Whether the given error is a unique-constraint violation.  Callers that
/// implement optimistic "first committer wins" allocation use this to decide
/// that they lost the race and should retry with the next candidate.
pub fn is_unique_violation(error: &DieselError) -> bool {
    matches!(
        error,
        DieselError::DatabaseError(DieselErrorKind::UniqueViolation, _)
    )
}

/// Converts a Diesel error to an external error.
pub fn public_error_from_diesel(
    error: DieselError,
    handler: ErrorHandler<'_>,
) -> PublicError {
    match handler {
        ErrorHandler::NotFoundByLookup(resource_type, lookup_type) => {
            match error {
                DieselError::NotFound => PublicError::ObjectNotFound {
                    type_name: resource_type,
                    lookup_type,
                },
                other => public_error_from_diesel_server(other),
            }
        }
        ErrorHandler::Conflict(resource_type, object_name) => match error {
            DieselError::DatabaseError(
                DieselErrorKind::UniqueViolation,
                _,
            ) => PublicError::ObjectAlreadyExists {
                type_name: resource_type,
                object_name: object_name.to_string(),
            },
            other => public_error_from_diesel_server(other),
        },
        ErrorHandler::Server => public_error_from_diesel_server(error),
    }
}

fn public_error_from_diesel_server(error: DieselError) -> PublicError {
    match error {
        DieselError::DatabaseError(kind, info) => {
            PublicError::internal_error(&format_database_error(kind, &*info))
        }
        error => PublicError::internal_error(&format!(
            "unknown diesel error: {:?}",
            error
        )),
    }
}
