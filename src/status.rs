//! DIMSE status codes used in acknowledgments and progress reporting

/// Operation completed successfully
pub const SUCCESS: u16 = 0x0000;

/// Operation cancelled by the requester
pub const CANCEL: u16 = 0xFE00;

/// More sub-operations remain
pub const PENDING: u16 = 0xFF00;

/// More sub-operations remain, optional keys were not supported
pub const PENDING_WARNING: u16 = 0xFF01;

/// Generic processing failure
pub const PROCESSING_FAILURE: u16 = 0x0110;

/// Sub-operations completed with one or more failures
pub const SUB_OP_ONE_OR_MORE_FAILURES: u16 = 0xB000;

/// Unable to process the request
pub const UNABLE_TO_PROCESS: u16 = 0xC000;

/// Whether the status code indicates a still-running operation
pub fn is_pending(status: u16) -> bool {
    status == PENDING || status == PENDING_WARNING
}

/// Whether the status code indicates success
pub fn is_success(status: u16) -> bool {
    status == SUCCESS
}
