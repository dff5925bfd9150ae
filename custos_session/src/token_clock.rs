//! Freshness decisions for access tokens
//!
//! Everything here is pure: the current time is always passed in. The access
//! token's payload is decoded without verifying its signature; that is the
//! authority's concern, and the only thing read here is when the token stops
//! being useful and whom it describes.

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use custos_clock::{DurationSecs, UnixTime};
use serde::{de, Deserialize, Deserializer};

use crate::{
    error::{malformed_token, malformed_token_because, MalformedTokenError},
    AccessTokenRef, Email, Roles, UserId,
};

const JWT_SEGMENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The claims of an access token that the session cares about
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[non_exhaustive]
pub struct AccessClaims {
    /// The subject, the user's identifier
    ///
    /// Numeric subjects are carried as their decimal form.
    #[serde(default, deserialize_with = "subject")]
    pub sub: Option<UserId>,
    /// The user's email address
    #[serde(default)]
    pub email: Option<Email>,
    /// The roles granted to the user
    #[serde(default)]
    pub roles: Roles,
    /// The expiry of the token
    #[serde(default, deserialize_with = "numeric_date")]
    pub exp: Option<UnixTime>,
}

/// Only the expiry, so that an odd claim elsewhere cannot hide it
#[derive(Deserialize)]
struct ExpiryClaim {
    #[serde(default, deserialize_with = "numeric_date")]
    exp: Option<UnixTime>,
}

fn subject<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<UserId>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Subject {
        Text(UserId),
        Number(serde_json::Number),
    }

    Ok(Option::<Subject>::deserialize(deserializer)?.map(|sub| match sub {
        Subject::Text(id) => id,
        Subject::Number(n) => UserId::new(n.to_string()),
    }))
}

/// A JWT `NumericDate`, which may carry fractional seconds
fn numeric_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<UnixTime>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumericDate {
        Whole(u64),
        Fractional(f64),
    }

    match Option::<NumericDate>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumericDate::Whole(secs)) => Ok(Some(UnixTime(secs))),
        // truncation never moves the expiry later
        Some(NumericDate::Fractional(secs)) if secs.is_finite() && secs >= 0.0 => {
            Ok(Some(UnixTime(secs as u64)))
        }
        Some(NumericDate::Fractional(secs)) => Err(de::Error::custom(format_args!(
            "expiry {} is not a valid NumericDate",
            secs
        ))),
    }
}

/// A token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is valid and not yet close to expiring
    Fresh,
    /// The token is still valid, but falls inside the refresh lookahead
    Stale,
    /// The token is no longer valid, or its expiry cannot be read
    Expired,
}

macro_rules! expect_three {
    ($iter:expr) => {{
        let mut i = $iter;
        match (i.next(), i.next(), i.next(), i.next()) {
            (Some(first), Some(second), Some(third), None) => Some((first, second, third)),
            _ => None,
        }
    }};
}

/// Decodes the unverified claims of an access token
///
/// # Errors
///
/// Fails if the token is not three dot-separated segments, or if the payload
/// is not base64url-encoded JSON.
pub fn decode_claims(token: &AccessTokenRef) -> Result<AccessClaims, MalformedTokenError> {
    decode_payload(token)
}

/// Decodes the expiry claim of an access token
///
/// Other claims are not looked at, so a token whose identity claims are
/// unusual still reports when it expires.
///
/// # Errors
///
/// Fails if the token cannot be decoded or carries no usable `exp` claim.
pub fn decode_expiry(token: &AccessTokenRef) -> Result<UnixTime, MalformedTokenError> {
    decode_payload::<ExpiryClaim>(token)?
        .exp
        .ok_or_else(malformed_token)
}

fn decode_payload<T>(token: &AccessTokenRef) -> Result<T, MalformedTokenError>
where
    T: for<'de> Deserialize<'de>,
{
    let (_header, payload, _signature) =
        expect_three!(token.as_str().split('.')).ok_or_else(malformed_token)?;
    let raw = JWT_SEGMENT
        .decode(payload)
        .map_err(malformed_token_because)?;
    serde_json::from_slice(&raw).map_err(malformed_token_because)
}

/// Whether the token has expired as of `now`
///
/// A token whose expiry cannot be read counts as expired.
pub fn is_expired(token: &AccessTokenRef, now: UnixTime) -> bool {
    decode_expiry(token).map_or(true, |exp| now >= exp)
}

/// Whether the token expires within `lookahead` of `now`
///
/// A token whose expiry cannot be read always needs refreshing.
pub fn needs_refresh(token: &AccessTokenRef, now: UnixTime, lookahead: DurationSecs) -> bool {
    decode_expiry(token).map_or(true, |exp| now >= exp - lookahead)
}

/// Time remaining until the token expires, zero once expired
///
/// `None` if the expiry cannot be read.
pub fn until_expired(token: &AccessTokenRef, now: UnixTime) -> Option<DurationSecs> {
    decode_expiry(token).ok().map(|exp| now.until(exp))
}

/// Classifies the token as of `now`
pub fn token_status(token: &AccessTokenRef, now: UnixTime, lookahead: DurationSecs) -> TokenStatus {
    match decode_expiry(token) {
        Ok(exp) if now >= exp => TokenStatus::Expired,
        Ok(exp) if now >= exp - lookahead => TokenStatus::Stale,
        Ok(_) => TokenStatus::Fresh,
        Err(_) => TokenStatus::Expired,
    }
}

#[cfg(test)]
pub(crate) fn encode_segment(raw: &[u8]) -> String {
    JWT_SEGMENT.encode(raw)
}
