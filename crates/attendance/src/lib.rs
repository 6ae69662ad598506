//! Attendance ledger: one sheet per activity, at most one record per
//! participant, last write wins.

pub mod sheet;

pub use sheet::{
    AttendanceCommand, AttendanceEvent, AttendanceRecord, AttendanceRecorded, AttendanceSheet,
    AttendanceSource, AttendanceStatus, RecordAttendance,
};
