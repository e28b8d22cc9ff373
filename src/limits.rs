/// Upper bound for a single day's headcount quota.
pub const MAX_QUOTA: u32 = 10_000;

/// Widest date window any range read or range write may cover (inclusive days).
pub const MAX_RANGE_DAYS: u64 = 366;

/// Longest reservation interval accepted from the submission pipeline.
pub const MAX_RESERVATION_DAYS: u64 = 366;

pub const MAX_BULK_ITEMS: usize = 500;
pub const MAX_NOTES_LEN: usize = 1_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_FIELDS_PER_FORM: usize = 256;
pub const MAX_IDS_PER_LOOKUP: usize = 1_000;

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 500;

pub const DEFAULT_HISTORY_LIMIT: usize = 30;
pub const MAX_HISTORY_LIMIT: usize = 365;

/// Request bodies larger than this are rejected before parsing.
pub const MAX_BODY_BYTES: usize = 1 << 20;

/// A reservation is "ending today" only when its run of consecutive days is
/// longer than this.
pub const ENDING_RUN_THRESHOLD: usize = 2;
