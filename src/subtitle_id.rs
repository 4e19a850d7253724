use crate::error::Error;
use std::fmt;
use std::str::FromStr;

/// Composite subtitle key: `<format>-<language>-<file id>[-sdh][-forced]`.
///
/// The language may itself contain a dash (`pt-PT`), so parsing anchors on the
/// first and last segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleId {
    pub format: String,
    pub language: String,
    pub file_id: u64,
    pub hearing_impaired: bool,
    pub forced: bool,
}

impl fmt::Display for SubtitleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.format, self.language, self.file_id)?;
        if self.hearing_impaired {
            f.write_str("-sdh")?;
        }
        if self.forced {
            f.write_str("-forced")?;
        }
        Ok(())
    }
}

impl FromStr for SubtitleId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidSubtitleId(s.to_string());
        let mut rest = s.trim();

        let forced = strip_suffix_ci(&mut rest, "-forced");
        let hearing_impaired = strip_suffix_ci(&mut rest, "-sdh");

        let (head, file_id) = rest.rsplit_once('-').ok_or_else(invalid)?;
        let file_id = file_id.parse::<u64>().map_err(|_| invalid())?;
        let (format, language) = head.split_once('-').ok_or_else(invalid)?;
        if format.is_empty() || language.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            format: format.to_string(),
            language: language.to_string(),
            file_id,
            hearing_impaired,
            forced,
        })
    }
}

fn strip_suffix_ci(s: &mut &str, suffix: &str) -> bool {
    let len = s.len();
    if len >= suffix.len()
        && s.is_char_boundary(len - suffix.len())
        && s[len - suffix.len()..].eq_ignore_ascii_case(suffix)
    {
        *s = &s[..len - suffix.len()];
        true
    } else {
        false
    }
}
