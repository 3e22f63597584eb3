//! Hard caps on stored state and on user-supplied input.

pub const MAX_ADVISORS: usize = 10_000;
pub const MAX_ENTRIES_PER_ADVISOR: usize = 50_000;

pub const MAX_NAME_LEN: usize = 128;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_ADVISOR_ID_LEN: usize = 128;
pub const MAX_REASON_LEN: usize = 256;
pub const MAX_COMMENT_LEN: usize = 2_000;
pub const STUDENT_NUMBER_LEN: usize = 9;

/// Longest booking horizon a policy may declare.
pub const MAX_HORIZON_DAYS: i64 = 366;
pub const MAX_CATALOG_SLOTS: usize = 96;

/// Attempts at drawing a fresh reference code before giving up.
pub const MAX_REFERENCE_ATTEMPTS: usize = 3;
