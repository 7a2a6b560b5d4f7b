//! Hash-password command implementation.

use anyhow::Result;
use zeroize::Zeroizing;

use crate::auth::hash_password;

/// Run the hash-password command
pub fn run(password: String) -> Result<()> {
    let password = Zeroizing::new(password);
    println!("{}", hash_password(&password)?);
    Ok(())
}
