//! Exit code constants for the tagweave CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, config, cache or I/O problems)
//! - 2: Template error (syntax, tag configuration, unsupported provider feature)
//! - 3: Model call failure (provider error, retries exhausted)

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments, unreadable files, invalid config.
pub const USER_ERROR: i32 = 1;

/// Template error: the template or one of its tags cannot be executed as written.
pub const TEMPLATE_ERROR: i32 = 2;

/// Model call failure: the provider failed or kept rate limiting us.
pub const MODEL_FAILURE: i32 = 3;
