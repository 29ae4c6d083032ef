//! Bcrypt password hashing for `createSession` / `createAccount`.

use crate::error::Result;

const COST: u32 = bcrypt::DEFAULT_COST;

pub fn hash(password: &str) -> Result<String> {
    Ok(bcrypt::hash(password, COST)?)
}

pub fn verify(password: &str, hash: &str) -> Result<bool> {
    Ok(bcrypt::verify(password, hash)?)
}
