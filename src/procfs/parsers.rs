//! Parsers to read structured data from the /proc directory

use std::str::FromStr;

use crate::core::metrics::ProcessCounters;
use crate::procfs::ProcfsError;

/// Represents data from `/proc/[pid]/stat`
///
/// Field numbering follows proc(5), 1-based.
#[derive(Eq, PartialEq, Debug, Copy, Clone)]
pub struct PidStat {
    /// Minor page faults (field 10)
    // scanf format: %lu
    minflt: u64,
    /// Major page faults (field 12)
    // scanf format: %lu
    majflt: u64,
    /// Time spent by the process in user mode (field 14)
    // scanf format: %lu
    utime: u64,
    /// Time spent by the process in kernel mode (field 15)
    // scanf format: %lu
    stime: u64,
}

impl PidStat {
    /// Parses the content of a `/proc/[pid]/stat` file
    ///
    /// The comm field (2) may contain spaces and parentheses, so tokens are
    /// counted from the last `)` of the line rather than from its start.
    pub fn parse(content: &str) -> Result<Self, ProcfsError> {
        let (_, after_comm) = content
            .rsplit_once(')')
            .ok_or(ProcfsError::UnexpectedFormat(2))?;

        // after_comm starts at field 3 (process state)
        let tokens: Vec<&str> = after_comm.split_whitespace().collect();

        Ok(PidStat {
            minflt: Self::field(&tokens, 10)?,
            majflt: Self::field(&tokens, 12)?,
            utime: Self::field(&tokens, 14)?,
            stime: Self::field(&tokens, 15)?,
        })
    }

    pub fn into_counters(self) -> ProcessCounters {
        ProcessCounters {
            minor_faults: self.minflt,
            major_faults: self.majflt,
            user_ticks: self.utime,
            system_ticks: self.stime,
        }
    }

    fn field<T>(tokens: &[&str], field_no: usize) -> Result<T, ProcfsError>
    where
        T: FromStr,
    {
        let token = tokens
            .get(field_no - 3)
            .ok_or(ProcfsError::UnexpectedFormat(field_no))?;

        token
            .parse()
            .map_err(|_| ProcfsError::InvalidToken(token.to_string()))
    }
}

#[cfg(test)]
impl PidStat {
    /// PidStat constructor for test purposes
    pub fn new(minflt: u64, majflt: u64, utime: u64, stime: u64) -> Self {
        PidStat {
            minflt,
            majflt,
            utime,
            stime,
        }
    }
}

#[cfg(test)]
mod test_pid_stat {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_parse_stat_file() {
        let content = "1905 (python3) S 1877 1905 1877 34822 1905 4194304 1096 0 42 \
13 217 54 10 0 20 0 1 0 487679 13963264 2541 18446744073709551615 4194304 7010805 \
140731882007344 0 0 0 0 16781312 134217730 1 0 0 17 0 0 0 0 0 0 9362864 9653016 \
10731520 140731882009319 140731882009327 140731882009327 140731882012647 0";

        let pid_stat = PidStat::parse(content).expect("Could not parse stat content");

        assert_eq!(pid_stat, PidStat::new(1096, 42, 217, 54));
    }

    #[test]
    fn test_parse_stat_file_with_spaces_in_command() {
        let content = "1905 (tmux: server (1)) S 1877 1905 1877 34822 1905 4194304 1096 0 42 \
13 217 54 10 0 20 0 1 0 487679 13963264 2541 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0 0 0 0 0 0 0 0";

        let pid_stat = PidStat::parse(content).expect("Could not parse stat content");

        assert_eq!(pid_stat, PidStat::new(1096, 42, 217, 54));
    }

    #[rstest]
    #[case("")]
    #[case("1905 (python3")]
    fn test_parse_should_fail_without_comm_field(#[case] content: &str) {
        assert!(matches!(
            PidStat::parse(content),
            Err(ProcfsError::UnexpectedFormat(2))
        ));
    }

    #[test]
    fn test_parse_should_fail_on_truncated_content() {
        let content = "1905 (python3) S 1877 1905 1877";

        assert!(matches!(
            PidStat::parse(content),
            Err(ProcfsError::UnexpectedFormat(10))
        ));
    }

    #[test]
    fn test_parse_should_fail_on_non_numeric_counter() {
        let content = "1905 (python3) S 1877 1905 1877 34822 1905 4194304 oops 0 42 \
13 217 54 10 0 20 0 1 0 487679";

        assert!(matches!(
            PidStat::parse(content),
            Err(ProcfsError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_into_counters_should_map_fields() {
        let counters = PidStat::new(1, 2, 3, 4).into_counters();

        assert_eq!(counters.minor_faults, 1);
        assert_eq!(counters.major_faults, 2);
        assert_eq!(counters.user_ticks, 3);
        assert_eq!(counters.system_ticks, 4);
        assert_eq!(counters.cpu_ticks(), 7);
    }
}
