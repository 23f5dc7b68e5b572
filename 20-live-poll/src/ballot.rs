//! The fixed ballot every poll is voted on.
//!
//! Options are the integers -3 through 3. On the wire they travel as their
//! decimal text (`"-3"`, `"0"`, `"2"`, ...) and only that exact spelling is
//! accepted: `"+1"` or `" 1"` are not valid options.

use std::{fmt, str::FromStr};

use serde::{Serialize, Serializer};
use thiserror::Error;

/// One of the seven values a participant may vote for.
///
/// Variants are declared in ascending order so the derived `Ord` sorts
/// tallies from -3 up to 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BallotOption {
    MinusThree,
    MinusTwo,
    MinusOne,
    Zero,
    PlusOne,
    PlusTwo,
    PlusThree,
}

impl BallotOption {
    /// Every option, lowest first.
    pub const ALL: [BallotOption; 7] = [
        BallotOption::MinusThree,
        BallotOption::MinusTwo,
        BallotOption::MinusOne,
        BallotOption::Zero,
        BallotOption::PlusOne,
        BallotOption::PlusTwo,
        BallotOption::PlusThree,
    ];

    pub fn value(self) -> i8 {
        match self {
            BallotOption::MinusThree => -3,
            BallotOption::MinusTwo => -2,
            BallotOption::MinusOne => -1,
            BallotOption::Zero => 0,
            BallotOption::PlusOne => 1,
            BallotOption::PlusTwo => 2,
            BallotOption::PlusThree => 3,
        }
    }
}

impl fmt::Display for BallotOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{0}' is not a ballot option")]
pub struct UnknownOption(pub String);

impl FromStr for BallotOption {
    type Err = UnknownOption;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let option = match s {
            "-3" => BallotOption::MinusThree,
            "-2" => BallotOption::MinusTwo,
            "-1" => BallotOption::MinusOne,
            "0" => BallotOption::Zero,
            "1" => BallotOption::PlusOne,
            "2" => BallotOption::PlusTwo,
            "3" => BallotOption::PlusThree,
            other => return Err(UnknownOption(other.to_string())),
        };
        Ok(option)
    }
}

// Serialized as text so tallies become JSON objects keyed by option.
impl Serialize for BallotOption {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
