use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const EXAMS: &str = "EXAM";
pub const STUDENTS: &str = "STUDENT";
pub const LECTURERS: &str = "LECTURER";
pub const INVIGILATIONS: &str = "INVIGILATION";
pub const ATTENDANCE: &str = "ATTENDANCE";
pub const BATHROOM_LOGS: &str = "BATHROOM_LOG";

/// Live status of one seat assignment. `Out` is never written through the
/// generic status setter; it is entered by `markOut` and left by `markIn`,
/// which keep the bathroom log in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeatStatus {
    Pending,
    Present,
    Absent,
    Out,
}

impl SeatStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Pending" => Some(Self::Pending),
            "Present" => Some(Self::Present),
            "Absent" => Some(Self::Absent),
            "Out" => Some(Self::Out),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Present => "Present",
            Self::Absent => "Absent",
            Self::Out => "Out",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogStatus {
    Out,
    Returned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
    pub exam_id: String,
    pub subject: String,
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Exam {
    /// An exam is complete once every schedule field has been filled in.
    /// Incomplete exams surface first in staff views.
    pub fn is_complete(&self) -> bool {
        self.date.is_some()
            && self.start_time.is_some()
            && self.end_time.is_some()
            && self.location.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatAssignment {
    pub attendance_id: String,
    pub exam_id: String,
    pub matric_no: String,
    pub student_name: String,
    pub table_no: String,
    pub status: SeatStatus,
    /// Stamped when the seat enters `Present`, cleared on reset to `Pending`.
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BathroomLog {
    pub log_id: String,
    pub attendance_id: String,
    pub exit_time: DateTime<Utc>,
    pub entry_time: Option<DateTime<Utc>>,
    pub status: LogStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvigilationAssignment {
    pub invigilation_id: String,
    pub exam_id: String,
    pub lecturer_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentProfile {
    pub matric_no: String,
    pub name: String,
    pub program: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LecturerProfile {
    pub lecturer_id: String,
    pub name: String,
    pub email: String,
    pub department: String,
}
