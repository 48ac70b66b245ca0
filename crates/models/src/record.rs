use std::sync::Arc;

use crate::{Date, NO_DATE};

/// Inclusive upper bound on patient ages.
pub const AGE_LIMIT: u8 = 120;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record line has {0} fields, expected 6")]
    FieldCount(usize),
    #[error("'{0}' is not ENTER or EXIT")]
    Event(String),
    #[error("age '{0}' is not an integer in [0, {AGE_LIMIT}]")]
    Age(String),
}

/// Whether a record line admits a patient or discharges one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Enter,
    Exit,
}

/// One parsed line of an input file:
/// `recordID ENTER|EXIT firstName lastName diseaseID age`.
///
/// The country and the date are not part of the line; they come from the
/// directory and file the line was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLine {
    pub id: String,
    pub event: Event,
    pub first_name: String,
    pub last_name: String,
    pub disease: String,
    pub age: u8,
}

impl std::str::FromStr for RecordLine {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        let count = fields.len();
        let [id, event, first_name, last_name, disease, age]: [&str; 6] = fields
            .try_into()
            .map_err(|_| RecordError::FieldCount(count))?;

        let event = match event {
            "ENTER" => Event::Enter,
            "EXIT" => Event::Exit,
            other => return Err(RecordError::Event(other.to_string())),
        };

        let age: u8 = age
            .parse()
            .ok()
            .filter(|age| *age <= AGE_LIMIT)
            .ok_or_else(|| RecordError::Age(age.to_string()))?;

        Ok(Self {
            id: id.to_string(),
            event,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            disease: disease.to_string(),
            age,
        })
    }
}

/// A fully ingested admission record.
///
/// `disease` and `country` are handles onto the owning shard's canonical
/// name strings; every record of the same disease (or country) shares one
/// allocation with the index bucket that names it.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub disease: Arc<str>,
    pub country: Arc<str>,
    pub age: u8,
    pub entry: Date,
    pub exit: Option<Date>,
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} ",
            self.id, self.first_name, self.last_name, self.disease, self.age, self.entry,
        )?;
        match self.exit {
            Some(exit) => write!(f, "{exit}"),
            None => write!(f, "{NO_DATE}"),
        }
    }
}

/// Counts over the four fixed age ranges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgeBuckets([u64; 4]);

impl AgeBuckets {
    pub const LABELS: [&'static str; 4] = ["0-20", "21-40", "41-60", "60+"];

    /// Bucket index for an age.
    pub fn slot(age: u8) -> usize {
        match age {
            0..=20 => 0,
            21..=40 => 1,
            41..=60 => 2,
            _ => 3,
        }
    }

    pub fn add(&mut self, age: u8) {
        self.0[Self::slot(age)] += 1;
    }

    pub fn counts(&self) -> [u64; 4] {
        self.0
    }

    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_a_record_line() {
        let line: RecordLine = "r1 ENTER Al B covid19 30".parse().unwrap();
        assert_eq!(
            line,
            RecordLine {
                id: "r1".to_string(),
                event: Event::Enter,
                first_name: "Al".to_string(),
                last_name: "B".to_string(),
                disease: "covid19".to_string(),
                age: 30,
            }
        );

        let exit: RecordLine = "r1 EXIT Al B covid19 30".parse().unwrap();
        assert_eq!(exit.event, Event::Exit);
    }

    #[test]
    fn rejects_field_count_event_and_age() {
        assert_eq!(
            "r1 ENTER Al B covid19".parse::<RecordLine>(),
            Err(RecordError::FieldCount(5))
        );
        assert_eq!(
            "r1 ENTER Al B covid19 30 extra".parse::<RecordLine>(),
            Err(RecordError::FieldCount(7))
        );
        assert_eq!(
            "r1 ADMIT Al B covid19 30".parse::<RecordLine>(),
            Err(RecordError::Event("ADMIT".to_string()))
        );
        assert_eq!(
            "r1 ENTER Al B covid19 121".parse::<RecordLine>(),
            Err(RecordError::Age("121".to_string()))
        );
        assert_eq!(
            "r1 ENTER Al B covid19 -1".parse::<RecordLine>(),
            Err(RecordError::Age("-1".to_string()))
        );
    }

    #[test]
    fn age_bounds_are_inclusive() {
        assert!("r1 ENTER Al B covid19 0".parse::<RecordLine>().is_ok());
        assert!("r1 ENTER Al B covid19 120".parse::<RecordLine>().is_ok());
    }

    #[test]
    fn bucket_boundaries() {
        assert_eq!(AgeBuckets::slot(0), 0);
        assert_eq!(AgeBuckets::slot(20), 0);
        assert_eq!(AgeBuckets::slot(21), 1);
        assert_eq!(AgeBuckets::slot(40), 1);
        assert_eq!(AgeBuckets::slot(41), 2);
        assert_eq!(AgeBuckets::slot(60), 2);
        assert_eq!(AgeBuckets::slot(61), 3);
        assert_eq!(AgeBuckets::slot(120), 3);
    }

    #[test]
    fn record_display_uses_the_absent_date_sentinel() {
        let mut record = Record {
            id: "r1".to_string(),
            first_name: "Al".to_string(),
            last_name: "B".to_string(),
            disease: Arc::from("covid19"),
            country: Arc::from("China"),
            age: 30,
            entry: "01-01-2020".parse().unwrap(),
            exit: None,
        };
        insta::assert_snapshot!(record.to_string(), @"r1 Al B covid19 30 01-01-2020 00-00-0000");

        record.exit = Some("05-01-2020".parse().unwrap());
        insta::assert_snapshot!(record.to_string(), @"r1 Al B covid19 30 01-01-2020 05-01-2020");
    }
}
