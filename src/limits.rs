/// Max listing calendars one engine will hold.
pub const MAX_LISTINGS: usize = 100_000;

/// Max open intervals on a single listing.
pub const MAX_INTERVALS_PER_LISTING: usize = 10_000;

/// Max bookings (any status) recorded against a single listing.
pub const MAX_BOOKINGS_PER_LISTING: usize = 100_000;

/// Longest stay accepted, in nights.
pub const MAX_STAY_NIGHTS: i64 = 730;

/// How far ahead of today a check-in may be, in days.
pub const MAX_BOOKING_HORIZON_DAYS: i64 = 3_650;

/// Upper bound for a listing's minimum stay, in nights.
pub const MAX_MINIMUM_STAY: u32 = 365;

/// Upper bound for a listing's cancellation lead time, in days.
pub const MAX_CANCELLATION_DAYS: u32 = 365;
