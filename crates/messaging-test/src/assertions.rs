//! Checks shared by roster scenarios.
//!
//! Each returns an [`AssertionError`] describing the mismatch so tests can use
//! `?` and keep the full context in the failure message.

use thiserror::Error;
use xmpp_parsers::stanza_error::{DefinedCondition, ErrorType};

use crate::error::PayloadError;
use crate::roster::{RosterItem, RosterQuery};
use crate::stanza::{IqResponse, Packet};

#[derive(Debug, Error)]
pub enum AssertionError {
    #[error("expected success, got {condition:?} ({error_type:?}) for request {id}")]
    UnexpectedError {
        id: String,
        condition: DefinedCondition,
        error_type: ErrorType,
    },

    #[error("expected {expected:?} ({expected_type:?}), got {actual}")]
    WrongError {
        expected: DefinedCondition,
        expected_type: ErrorType,
        actual: String,
    },

    #[error("expected a roster push IQ, got {0}")]
    NotARosterPush(String),

    #[error("roster payload is malformed: {0}")]
    Payload(#[from] PayloadError),

    #[error("response {0} carries no payload")]
    MissingPayload(String),

    #[error("roster items differ\n  expected: {expected:?}\n    actual: {actual:?}")]
    ItemsDiffer {
        expected: Vec<RosterItem>,
        actual: Vec<RosterItem>,
    },
}

pub fn assert_no_error(response: &IqResponse) -> Result<(), AssertionError> {
    match response.error {
        None => Ok(()),
        Some(ref error) => Err(AssertionError::UnexpectedError {
            id: response.id.clone(),
            condition: error.defined_condition.clone(),
            error_type: error.type_.clone(),
        }),
    }
}

/// The response is an error with the given condition and type, and no payload.
pub fn assert_error(
    response: &IqResponse,
    condition: DefinedCondition,
    error_type: ErrorType,
) -> Result<(), AssertionError> {
    let mismatch = |actual: String| AssertionError::WrongError {
        expected: condition.clone(),
        expected_type: error_type.clone(),
        actual,
    };

    let Some(ref error) = response.error else {
        return Err(mismatch("a successful response".to_string()));
    };
    if error.defined_condition != condition || error.type_ != error_type {
        return Err(mismatch(format!(
            "{:?} ({:?})",
            error.defined_condition, error.type_
        )));
    }
    if response.payload.is_some() {
        return Err(mismatch("an error carrying a payload".to_string()));
    }
    Ok(())
}

/// Shorthand for the `bad-request`/`modify` rejection roster scenarios expect.
pub fn assert_bad_request(response: &IqResponse) -> Result<(), AssertionError> {
    assert_error(response, DefinedCondition::BadRequest, ErrorType::Modify)
}

/// `packet` is a roster push carrying exactly `expected`.
pub fn assert_roster_push(packet: &Packet, expected: &[RosterItem]) -> Result<(), AssertionError> {
    let describe = || format!("{:?}", packet.kind());
    let payload = packet
        .request_payload()
        .ok_or_else(|| AssertionError::NotARosterPush(describe()))?;
    let query = RosterQuery::from_element(payload)?;
    assert_items(expected, &query.items)
}

/// Roster carried by a get response.
pub fn roster_from_response(response: &IqResponse) -> Result<RosterQuery, AssertionError> {
    assert_no_error(response)?;
    let payload = response
        .payload
        .as_ref()
        .ok_or_else(|| AssertionError::MissingPayload(response.id.clone()))?;
    Ok(RosterQuery::from_element(payload)?)
}

pub fn assert_items(expected: &[RosterItem], actual: &[RosterItem]) -> Result<(), AssertionError> {
    if expected == actual {
        Ok(())
    } else {
        Err(AssertionError::ItemsDiffer {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        })
    }
}
