//! Process exit codes.
//! Fetch failures map through `FetchError::exit_code`; these cover the rest.

pub const SUCCESS: i32 = 0;
pub const INTERNAL_ERROR: i32 = 2; // Setup failed (bad flags, client construction, I/O)
