use crate::{Date, DateError, DateRange};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}'")]
    UnknownVerb(String),
    #[error("missing argument <{0}>")]
    MissingArgument(&'static str),
    #[error("unexpected trailing argument '{0}'")]
    Trailing(String),
    #[error("'{0}' is not a non-negative integer k")]
    BadK(String),
    #[error(transparent)]
    Date(#[from] DateError),
}

/// A parsed wire command. `Display` renders the normalized form forwarded
/// between broker and workers, with the leading slash preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    ListCountries,
    DiseaseFrequency {
        disease: String,
        range: DateRange,
        country: Option<String>,
    },
    TopkAgeRanges {
        k: usize,
        country: String,
        disease: String,
        range: DateRange,
    },
    SearchPatientRecord {
        record_id: String,
    },
    NumPatientAdmissions {
        disease: String,
        range: DateRange,
        country: Option<String>,
    },
    NumPatientDischarges {
        disease: String,
        range: DateRange,
        country: Option<String>,
    },
    TopkDiseases {
        k: usize,
        country: String,
        range: Option<DateRange>,
    },
    TopkCountries {
        k: usize,
        disease: String,
        range: Option<DateRange>,
    },
    Exit,
}

struct Parser<'a> {
    tokens: std::str::SplitWhitespace<'a>,
}

impl<'a> Parser<'a> {
    fn take(&mut self, name: &'static str) -> Result<&'a str, QueryError> {
        self.tokens
            .next()
            .ok_or(QueryError::MissingArgument(name))
    }

    fn take_opt(&mut self) -> Option<&'a str> {
        self.tokens.next()
    }

    fn take_k(&mut self) -> Result<usize, QueryError> {
        let token = self.take("k")?;
        token
            .parse()
            .map_err(|_| QueryError::BadK(token.to_string()))
    }

    fn take_date(&mut self, name: &'static str) -> Result<Date, QueryError> {
        Ok(self.take(name)?.parse::<Date>()?)
    }

    fn take_range(&mut self) -> Result<DateRange, QueryError> {
        let first = self.take_date("date1")?;
        let last = self.take_date("date2")?;
        Ok(DateRange::new(first, last)?)
    }

    /// An optional trailing `[date1 date2]` pair; one date without the other
    /// is an error.
    fn take_range_opt(&mut self) -> Result<Option<DateRange>, QueryError> {
        let Some(first) = self.take_opt() else {
            return Ok(None);
        };
        let first: Date = first.parse()?;
        let last = self.take_date("date2")?;
        Ok(Some(DateRange::new(first, last)?))
    }

    fn finish(mut self) -> Result<(), QueryError> {
        match self.tokens.next() {
            Some(extra) => Err(QueryError::Trailing(extra.to_string())),
            None => Ok(()),
        }
    }
}

impl std::str::FromStr for Query {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tokens = s.split_whitespace();
        let verb = tokens.next().ok_or(QueryError::Empty)?;
        let mut args = Parser { tokens };

        let query = match verb {
            "/listCountries" => Query::ListCountries,
            "/diseaseFrequency" => Query::DiseaseFrequency {
                disease: args.take("disease")?.to_string(),
                range: args.take_range()?,
                country: args.take_opt().map(str::to_string),
            },
            "/topk-AgeRanges" => Query::TopkAgeRanges {
                k: args.take_k()?,
                country: args.take("country")?.to_string(),
                disease: args.take("disease")?.to_string(),
                range: args.take_range()?,
            },
            "/searchPatientRecord" => Query::SearchPatientRecord {
                record_id: args.take("recordID")?.to_string(),
            },
            "/numPatientAdmissions" => Query::NumPatientAdmissions {
                disease: args.take("disease")?.to_string(),
                range: args.take_range()?,
                country: args.take_opt().map(str::to_string),
            },
            "/numPatientDischarges" => Query::NumPatientDischarges {
                disease: args.take("disease")?.to_string(),
                range: args.take_range()?,
                country: args.take_opt().map(str::to_string),
            },
            "/topk-Diseases" => Query::TopkDiseases {
                k: args.take_k()?,
                country: args.take("country")?.to_string(),
                range: args.take_range_opt()?,
            },
            "/topk-Countries" => Query::TopkCountries {
                k: args.take_k()?,
                disease: args.take("disease")?.to_string(),
                range: args.take_range_opt()?,
            },
            "/exit" => Query::Exit,
            other => return Err(QueryError::UnknownVerb(other.to_string())),
        };

        args.finish()?;
        Ok(query)
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn tail(
            f: &mut std::fmt::Formatter<'_>,
            country: &Option<String>,
        ) -> std::fmt::Result {
            match country {
                Some(country) => write!(f, " {country}"),
                None => Ok(()),
            }
        }

        match self {
            Query::ListCountries => write!(f, "/listCountries"),
            Query::DiseaseFrequency {
                disease,
                range,
                country,
            } => {
                write!(f, "/diseaseFrequency {disease} {range}")?;
                tail(f, country)
            }
            Query::TopkAgeRanges {
                k,
                country,
                disease,
                range,
            } => write!(f, "/topk-AgeRanges {k} {country} {disease} {range}"),
            Query::SearchPatientRecord { record_id } => {
                write!(f, "/searchPatientRecord {record_id}")
            }
            Query::NumPatientAdmissions {
                disease,
                range,
                country,
            } => {
                write!(f, "/numPatientAdmissions {disease} {range}")?;
                tail(f, country)
            }
            Query::NumPatientDischarges {
                disease,
                range,
                country,
            } => {
                write!(f, "/numPatientDischarges {disease} {range}")?;
                tail(f, country)
            }
            Query::TopkDiseases { k, country, range } => {
                write!(f, "/topk-Diseases {k} {country}")?;
                match range {
                    Some(range) => write!(f, " {range}"),
                    None => Ok(()),
                }
            }
            Query::TopkCountries { k, disease, range } => {
                write!(f, "/topk-Countries {k} {disease}")?;
                match range {
                    Some(range) => write!(f, " {range}"),
                    None => Ok(()),
                }
            }
            Query::Exit => write!(f, "/exit"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(s: &str) -> Query {
        s.parse().unwrap()
    }

    #[test]
    fn parses_every_verb_and_round_trips() {
        for s in [
            "/listCountries",
            "/diseaseFrequency covid19 01-01-2020 31-12-2020",
            "/diseaseFrequency covid19 01-01-2020 31-12-2020 France",
            "/topk-AgeRanges 4 China covid19 01-01-2020 31-12-2020",
            "/searchPatientRecord r1",
            "/numPatientAdmissions covid19 01-01-2020 31-12-2020",
            "/numPatientAdmissions covid19 01-01-2020 31-12-2020 Italy",
            "/numPatientDischarges covid19 01-01-2020 31-12-2020",
            "/topk-Diseases 3 China",
            "/topk-Diseases 3 China 01-01-2020 31-12-2020",
            "/topk-Countries 2 covid19",
            "/topk-Countries 2 covid19 01-01-2020 31-12-2020",
            "/exit",
        ] {
            assert_eq!(parse(s).to_string(), s, "round trip of {s:?}");
        }
    }

    #[test]
    fn normalizes_whitespace() {
        assert_eq!(
            parse("  /searchPatientRecord\tr1 "),
            Query::SearchPatientRecord {
                record_id: "r1".to_string()
            }
        );
    }

    #[test]
    fn rejects_unknown_verbs_and_arity_errors() {
        assert_eq!("".parse::<Query>(), Err(QueryError::Empty));
        assert_eq!(
            "/frobnicate".parse::<Query>(),
            Err(QueryError::UnknownVerb("/frobnicate".to_string()))
        );
        assert_eq!(
            "/searchPatientRecord".parse::<Query>(),
            Err(QueryError::MissingArgument("recordID"))
        );
        assert_eq!(
            "/searchPatientRecord r1 r2".parse::<Query>(),
            Err(QueryError::Trailing("r2".to_string()))
        );
        assert_eq!(
            "/listCountries now".parse::<Query>(),
            Err(QueryError::Trailing("now".to_string()))
        );
        // A country after the interval is fine, a fifth argument is not.
        assert!(
            "/diseaseFrequency covid19 01-01-2020 31-12-2020 France extra"
                .parse::<Query>()
                .is_err()
        );
    }

    #[test]
    fn rejects_bad_k_and_bad_dates() {
        assert_eq!(
            "/topk-AgeRanges -1 China covid19 01-01-2020 31-12-2020".parse::<Query>(),
            Err(QueryError::BadK("-1".to_string()))
        );
        assert!(matches!(
            "/diseaseFrequency covid19 00-00-0000 31-12-2020".parse::<Query>(),
            Err(QueryError::Date(DateError::Malformed(_)))
        ));
        assert!(matches!(
            "/diseaseFrequency covid19 31-12-2020 01-01-2020".parse::<Query>(),
            Err(QueryError::Date(DateError::Interval(_, _)))
        ));
        // One date of an optional pair without the other.
        assert_eq!(
            "/topk-Diseases 3 China 01-01-2020".parse::<Query>(),
            Err(QueryError::MissingArgument("date2"))
        );
    }

    #[test]
    fn k_zero_is_accepted() {
        assert!(matches!(
            parse("/topk-AgeRanges 0 China covid19 01-01-2020 31-12-2020"),
            Query::TopkAgeRanges { k: 0, .. }
        ));
    }
}
