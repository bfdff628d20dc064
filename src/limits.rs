pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 64;

pub const MAX_FACILITIES_PER_TENANT: usize = 10_000;
pub const MAX_NAME_LEN: usize = 128;
pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_PASSWORD_LEN: usize = 1024;

/// Reservations plus manual events held by one facility.
pub const MAX_BOOKINGS_PER_FACILITY: usize = 100_000;
pub const MAX_BATCH_SIZE: usize = 500;

pub const MAX_PAGE_SIZE: usize = 500;
pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_CALENDAR_WINDOW_DAYS: i64 = 366;
