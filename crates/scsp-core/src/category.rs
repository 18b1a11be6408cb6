//! Mapping of server error codes onto the database error taxonomy.
//!
//! Server error frames carry a primary code and, optionally, an extended code
//! that refines it. The extended code is looked up first; when it is absent
//! (zero) or unknown the primary code decides, and anything unrecognised is a
//! generic [`ErrorCategory::Database`] error.

use std::fmt;

/// Category of a server-reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Non-fatal condition reported by the server
    Warning,
    /// Errors related to the database's operation (busy, locked, I/O, bad SQL)
    Operational,
    /// The database encountered an internal error
    Internal,
    /// Relational integrity violated (constraints, type mismatch)
    Integrity,
    /// Problems with the processed data (value too big)
    Data,
    /// Misuse of the API (bad parameter index, library misuse)
    Programming,
    /// Any other database error
    Database,
}

impl ErrorCategory {
    /// Map `(code, extended_code)` into a category.
    pub fn from_codes(code: u32, extended_code: u32) -> Self {
        if extended_code != 0 {
            if let Some(category) = lookup(EXTENDED_CODES, extended_code) {
                return category;
            }
        }
        lookup(PRIMARY_CODES, code).unwrap_or(ErrorCategory::Database)
    }

    /// Name used by database-access interfaces for this category.
    pub const fn name(self) -> &'static str {
        match self {
            ErrorCategory::Warning => "Warning",
            ErrorCategory::Operational => "OperationalError",
            ErrorCategory::Internal => "InternalError",
            ErrorCategory::Integrity => "IntegrityError",
            ErrorCategory::Data => "DataError",
            ErrorCategory::Programming => "ProgrammingError",
            ErrorCategory::Database => "DatabaseError",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn lookup(table: &[(u32, ErrorCategory)], code: u32) -> Option<ErrorCategory> {
    table
        .iter()
        .find(|(candidate, _)| *candidate == code)
        .map(|(_, category)| *category)
}

/// Primary result codes.
pub mod codes {
    pub const ERROR: u32 = 1;
    pub const INTERNAL: u32 = 2;
    pub const PERM: u32 = 3;
    pub const ABORT: u32 = 4;
    pub const BUSY: u32 = 5;
    pub const LOCKED: u32 = 6;
    pub const NOMEM: u32 = 7;
    pub const READONLY: u32 = 8;
    pub const INTERRUPT: u32 = 9;
    pub const IOERR: u32 = 10;
    pub const CORRUPT: u32 = 11;
    pub const NOTFOUND: u32 = 12;
    pub const FULL: u32 = 13;
    pub const CANTOPEN: u32 = 14;
    pub const PROTOCOL: u32 = 15;
    pub const EMPTY: u32 = 16;
    pub const SCHEMA: u32 = 17;
    pub const TOOBIG: u32 = 18;
    pub const CONSTRAINT: u32 = 19;
    pub const MISMATCH: u32 = 20;
    pub const MISUSE: u32 = 21;
    pub const NOLFS: u32 = 22;
    pub const AUTH: u32 = 23;
    pub const FORMAT: u32 = 24;
    pub const RANGE: u32 = 25;
    pub const NOTADB: u32 = 26;
    pub const NOTICE: u32 = 27;
    pub const WARNING: u32 = 28;
}

/// Extended result codes (primary code in the low byte).
pub mod extended_codes {
    pub const ERROR_MISSING_COLLSEQ: u32 = 257;
    pub const ERROR_RETRY: u32 = 513;
    pub const ERROR_SNAPSHOT: u32 = 769;
    pub const IOERR_READ: u32 = 266;
    pub const IOERR_SHORT_READ: u32 = 522;
    pub const IOERR_WRITE: u32 = 778;
    pub const LOCKED_SHAREDCACHE: u32 = 262;
    pub const LOCKED_VTAB: u32 = 518;
    pub const BUSY_RECOVERY: u32 = 261;
    pub const BUSY_SNAPSHOT: u32 = 517;
    pub const BUSY_TIMEOUT: u32 = 773;
    pub const CANTOPEN_NOTEMPDIR: u32 = 270;
    pub const CANTOPEN_ISDIR: u32 = 526;
    pub const CORRUPT_VTAB: u32 = 267;
    pub const CORRUPT_SEQUENCE: u32 = 523;
    pub const CORRUPT_INDEX: u32 = 779;
    pub const READONLY_RECOVERY: u32 = 264;
    pub const READONLY_CANTLOCK: u32 = 520;
    pub const READONLY_ROLLBACK: u32 = 776;
    pub const READONLY_DBMOVED: u32 = 1032;
    pub const ABORT_ROLLBACK: u32 = 516;
    pub const CONSTRAINT_CHECK: u32 = 275;
    pub const CONSTRAINT_COMMITHOOK: u32 = 531;
    pub const CONSTRAINT_FOREIGNKEY: u32 = 787;
    pub const CONSTRAINT_FUNCTION: u32 = 1043;
    pub const CONSTRAINT_NOTNULL: u32 = 1299;
    pub const CONSTRAINT_PRIMARYKEY: u32 = 1555;
    pub const CONSTRAINT_TRIGGER: u32 = 1811;
    pub const CONSTRAINT_UNIQUE: u32 = 2067;
    pub const CONSTRAINT_VTAB: u32 = 2323;
    pub const CONSTRAINT_ROWID: u32 = 2579;
    pub const CONSTRAINT_PINNED: u32 = 2835;
    pub const CONSTRAINT_DATATYPE: u32 = 3091;
    pub const NOTICE_RECOVER_WAL: u32 = 283;
    pub const NOTICE_RECOVER_ROLLBACK: u32 = 539;
    pub const WARNING_AUTOINDEX: u32 = 284;
    pub const AUTH_USER: u32 = 279;
}

const PRIMARY_CODES: &[(u32, ErrorCategory)] = {
    use ErrorCategory::{Data, Database, Integrity, Internal, Operational, Programming, Warning};
    use codes::*;
    &[
        (ERROR, Operational),
        (INTERNAL, Internal),
        (PERM, Operational),
        (ABORT, Operational),
        (BUSY, Operational),
        (LOCKED, Operational),
        (NOMEM, Internal),
        (READONLY, Operational),
        (INTERRUPT, Operational),
        (IOERR, Operational),
        (CORRUPT, Database),
        (NOTFOUND, Internal),
        (FULL, Operational),
        (CANTOPEN, Operational),
        (PROTOCOL, Operational),
        (EMPTY, Operational),
        (SCHEMA, Operational),
        (TOOBIG, Data),
        (CONSTRAINT, Integrity),
        (MISMATCH, Integrity),
        (MISUSE, Programming),
        (NOLFS, Operational),
        (AUTH, Operational),
        (FORMAT, Database),
        (RANGE, Programming),
        (NOTADB, Database),
        (NOTICE, Warning),
        (WARNING, Warning),
    ]
};

const EXTENDED_CODES: &[(u32, ErrorCategory)] = {
    use ErrorCategory::{Database, Integrity, Operational, Warning};
    use extended_codes::*;
    &[
        (ERROR_MISSING_COLLSEQ, Operational),
        (ERROR_RETRY, Operational),
        (ERROR_SNAPSHOT, Operational),
        (IOERR_READ, Operational),
        (IOERR_SHORT_READ, Operational),
        (IOERR_WRITE, Operational),
        (LOCKED_SHAREDCACHE, Operational),
        (LOCKED_VTAB, Operational),
        (BUSY_RECOVERY, Operational),
        (BUSY_SNAPSHOT, Operational),
        (BUSY_TIMEOUT, Operational),
        (CANTOPEN_NOTEMPDIR, Operational),
        (CANTOPEN_ISDIR, Operational),
        (CORRUPT_VTAB, Database),
        (CORRUPT_SEQUENCE, Database),
        (CORRUPT_INDEX, Database),
        (READONLY_RECOVERY, Operational),
        (READONLY_CANTLOCK, Operational),
        (READONLY_ROLLBACK, Operational),
        (READONLY_DBMOVED, Operational),
        (ABORT_ROLLBACK, Operational),
        (CONSTRAINT_CHECK, Integrity),
        (CONSTRAINT_COMMITHOOK, Integrity),
        (CONSTRAINT_FOREIGNKEY, Integrity),
        (CONSTRAINT_FUNCTION, Integrity),
        (CONSTRAINT_NOTNULL, Integrity),
        (CONSTRAINT_PRIMARYKEY, Integrity),
        (CONSTRAINT_TRIGGER, Integrity),
        (CONSTRAINT_UNIQUE, Integrity),
        (CONSTRAINT_VTAB, Integrity),
        (CONSTRAINT_ROWID, Integrity),
        (CONSTRAINT_PINNED, Integrity),
        (CONSTRAINT_DATATYPE, Integrity),
        (NOTICE_RECOVER_WAL, Warning),
        (NOTICE_RECOVER_ROLLBACK, Warning),
        (WARNING_AUTOINDEX, Warning),
        (AUTH_USER, Operational),
    ]
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_primary_code_maps_to_its_table_entry() {
        for (code, expected) in PRIMARY_CODES {
            assert_eq!(ErrorCategory::from_codes(*code, 0), *expected, "code {code}");
        }
    }

    #[test]
    fn every_extended_code_maps_to_its_table_entry() {
        for (extended, expected) in EXTENDED_CODES {
            // the primary code is deliberately unrelated to show precedence
            assert_eq!(
                ErrorCategory::from_codes(codes::WARNING, *extended),
                *expected,
                "extended {extended}"
            );
        }
    }

    #[test]
    fn extended_code_takes_precedence() {
        assert_eq!(
            ErrorCategory::from_codes(codes::ERROR, extended_codes::CONSTRAINT_UNIQUE),
            ErrorCategory::Integrity
        );
        assert_eq!(
            ErrorCategory::from_codes(codes::CONSTRAINT, extended_codes::NOTICE_RECOVER_WAL),
            ErrorCategory::Warning
        );
    }

    #[test]
    fn unknown_extended_falls_back_to_primary() {
        assert_eq!(
            ErrorCategory::from_codes(codes::CONSTRAINT, 99_999),
            ErrorCategory::Integrity
        );
        assert_eq!(
            ErrorCategory::from_codes(codes::TOOBIG, 0),
            ErrorCategory::Data
        );
    }

    #[test]
    fn unknown_pairs_are_generic_database_errors() {
        assert_eq!(ErrorCategory::from_codes(0, 0), ErrorCategory::Database);
        assert_eq!(ErrorCategory::from_codes(10_004, 0), ErrorCategory::Database);
        assert_eq!(
            ErrorCategory::from_codes(4242, 4242),
            ErrorCategory::Database
        );
    }

    #[test]
    fn misuse_and_range_are_programming_errors() {
        assert_eq!(
            ErrorCategory::from_codes(codes::MISUSE, 0),
            ErrorCategory::Programming
        );
        assert_eq!(
            ErrorCategory::from_codes(codes::RANGE, 0),
            ErrorCategory::Programming
        );
    }

    #[test]
    fn display_uses_interface_names() {
        assert_eq!(ErrorCategory::Operational.to_string(), "OperationalError");
        assert_eq!(ErrorCategory::Database.to_string(), "DatabaseError");
        assert_eq!(ErrorCategory::Warning.to_string(), "Warning");
    }
}
