// Operation codes for the wire transaction log

// Framing
pub const OP_BEGIN: u8 = 1;
pub const OP_COMMIT: u8 = 2;

// Row operations
pub const OP_INSERT: u8 = 3;
pub const OP_UPDATE: u8 = 4;
pub const OP_DELETE: u8 = 5;
pub const OP_TRUNCATE: u8 = 6;

// Schema migrations
pub const OP_MIGRATE: u8 = 7;

// Migration statement kinds
pub const STMT_CREATE_TABLE: u8 = 1;
pub const STMT_ALTER_ADD_COLUMN: u8 = 2;
pub const STMT_CREATE_INDEX: u8 = 3;

// Frame flags
pub const FLAG_COMPRESSED: u8 = 0x01;

// Begin flags
pub const BEGIN_MIGRATION: u8 = 0x01;
