use std::fmt;

pub const DELIM: char = '_';

/// Identifies one seat assignment: `{exam_id}_{matric_no}`.
///
/// Exam ids must not contain the delimiter so that parsing stays exact;
/// matric numbers may (the first delimiter always ends the exam id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatKey {
    pub exam_id: String,
    pub matric_no: String,
}

impl SeatKey {
    pub fn new(exam_id: &str, matric_no: &str) -> anyhow::Result<Self> {
        validate_leading(exam_id, "exam id")?;
        validate_trailing(matric_no, "matric no")?;
        Ok(Self {
            exam_id: exam_id.to_string(),
            matric_no: matric_no.to_string(),
        })
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let Some((exam_id, matric_no)) = raw.split_once(DELIM) else {
            anyhow::bail!("seat key {raw:?} has no delimiter");
        };
        Self::new(exam_id, matric_no)
    }
}

impl fmt::Display for SeatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.exam_id, DELIM, self.matric_no)
    }
}

/// Identifies one invigilation assignment: `{exam_id}_{lecturer_id}`.
///
/// Lecturer ids contain the delimiter (`L_12345`), so they can only sit in
/// the trailing position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvigilationKey {
    pub exam_id: String,
    pub lecturer_id: String,
}

impl InvigilationKey {
    pub fn new(exam_id: &str, lecturer_id: &str) -> anyhow::Result<Self> {
        validate_leading(exam_id, "exam id")?;
        validate_trailing(lecturer_id, "lecturer id")?;
        Ok(Self {
            exam_id: exam_id.to_string(),
            lecturer_id: lecturer_id.to_string(),
        })
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let Some((exam_id, lecturer_id)) = raw.split_once(DELIM) else {
            anyhow::bail!("invigilation key {raw:?} has no delimiter");
        };
        Self::new(exam_id, lecturer_id)
    }
}

impl fmt::Display for InvigilationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.exam_id, DELIM, self.lecturer_id)
    }
}

/// Identifies one bathroom log entry: `{seat_key}_{seq}`, seq starting at 1
/// per seat assignment. The sequence is always the last component, so
/// parsing splits on the last delimiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogKey {
    pub seat: SeatKey,
    pub seq: u32,
}

impl LogKey {
    pub fn new(seat: SeatKey, seq: u32) -> anyhow::Result<Self> {
        if seq == 0 {
            anyhow::bail!("log sequence starts at 1");
        }
        Ok(Self { seat, seq })
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let Some((seat_raw, seq_raw)) = raw.rsplit_once(DELIM) else {
            anyhow::bail!("log key {raw:?} has no delimiter");
        };
        let seq: u32 = seq_raw
            .parse()
            .map_err(|_| anyhow::anyhow!("log key {raw:?} has non-numeric sequence"))?;
        Self::new(SeatKey::parse(seat_raw)?, seq)
    }
}

impl fmt::Display for LogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.seat, DELIM, self.seq)
    }
}

fn validate_leading(part: &str, what: &str) -> anyhow::Result<()> {
    if part.is_empty() {
        anyhow::bail!("{what} must not be empty");
    }
    if part.contains(DELIM) {
        anyhow::bail!("{what} must not contain {DELIM:?}");
    }
    Ok(())
}

fn validate_trailing(part: &str, what: &str) -> anyhow::Result<()> {
    if part.is_empty() {
        anyhow::bail!("{what} must not be empty");
    }
    Ok(())
}
