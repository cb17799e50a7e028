use serde::{de, Deserialize, Deserializer, Serialize};
use tracing::debug;

/// One instruction from the bot.
///
/// Offsets are kept exactly as received: range checks belong to action resolution, where an
/// out-of-range offset is a no-op that still costs AP. Numbers may arrive as `1`, `1.0` or `"1"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    #[default]
    Wait,
    Move {
        #[serde(default, deserialize_with = "integral")]
        dx: i64,
        #[serde(default, deserialize_with = "integral")]
        dy: i64,
    },
    GetSeeds {
        #[serde(default = "one", deserialize_with = "integral")]
        n: i64,
    },
    Plant {
        #[serde(default, deserialize_with = "integral")]
        dx: i64,
        #[serde(default, deserialize_with = "integral")]
        dy: i64,
    },
    Harvest {
        #[serde(default, deserialize_with = "integral")]
        dx: i64,
        #[serde(default, deserialize_with = "integral")]
        dy: i64,
    },
    Deposit,
}

fn one() -> i64 {
    1
}

/// Whole numbers in any JSON form. Fractions, out-of-range values and other types are errors.
fn integral<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Int(i64),
        Float(f64),
        Text(String),
    }

    match Number::deserialize(deserializer)? {
        Number::Int(n) => Ok(n),
        Number::Float(f)
            if f.fract() == 0.0 && (i64::MIN as f64..i64::MAX as f64).contains(&f) =>
        {
            Ok(f as i64)
        }
        Number::Float(f) => Err(de::Error::custom(format!("{f} is not a whole number"))),
        Number::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("{s:?} is not a whole number"))),
    }
}

impl Action {
    /// Normalize one untrusted reply. Absent, empty, unparsable or ill-typed input is `Wait`.
    pub fn parse(raw: Option<&str>) -> Action {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Action::Wait;
        };
        match serde_json::from_str(raw) {
            Ok(action) => action,
            Err(e) => {
                debug!(%e, "unreadable action, defaulting to wait");
                Action::Wait
            }
        }
    }

    pub fn to_line(&self) -> String {
        // serializing a plain enum cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"action":"wait"}"#.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_variant() {
        assert_eq!(Action::parse(Some(r#"{"action":"wait"}"#)), Action::Wait);
        assert_eq!(
            Action::parse(Some(r#"{"action":"move","dx":-1,"dy":1}"#)),
            Action::Move { dx: -1, dy: 1 }
        );
        assert_eq!(
            Action::parse(Some(r#"{"action":"get_seeds","n":4}"#)),
            Action::GetSeeds { n: 4 }
        );
        assert_eq!(
            Action::parse(Some(r#"{"action":"get_seeds"}"#)),
            Action::GetSeeds { n: 1 }
        );
        assert_eq!(
            Action::parse(Some(r#"{"action":"plant","dx":1,"dy":0}"#)),
            Action::Plant { dx: 1, dy: 0 }
        );
        assert_eq!(
            Action::parse(Some(r#"{"action":"harvest","dx":0,"dy":1}"#)),
            Action::Harvest { dx: 0, dy: 1 }
        );
        assert_eq!(
            Action::parse(Some("{\"action\":\"deposit\"}\n")),
            Action::Deposit
        );
    }

    #[test]
    fn garbage_becomes_wait() {
        for raw in [
            "",
            "   ",
            "not json",
            "{}",
            "[1,2]",
            "\"move\"",
            r#"{"action":"fly"}"#,
            r#"{"action":"move","dx":"left"}"#,
            r#"{"action":"get_seeds","n":2.5}"#,
            r#"{"action":"move","dx":99999999999999999999}"#,
        ] {
            assert_eq!(Action::parse(Some(raw)), Action::Wait, "input: {raw:?}");
        }
        assert_eq!(Action::parse(None), Action::Wait);
    }

    #[test]
    fn whole_numbers_in_any_form() {
        assert_eq!(
            Action::parse(Some(r#"{"action":"move","dx":1.0,"dy":-1.0}"#)),
            Action::Move { dx: 1, dy: -1 }
        );
        assert_eq!(
            Action::parse(Some(r#"{"action":"get_seeds","n":"3"}"#)),
            Action::GetSeeds { n: 3 }
        );
        assert_eq!(
            Action::parse(Some(r#"{"action":"plant","dx":" -1 ","dy":0}"#)),
            Action::Plant { dx: -1, dy: 0 }
        );
        for raw in [
            r#"{"action":"move","dx":"1.5"}"#,
            r#"{"action":"move","dx":true}"#,
            r#"{"action":"harvest","dx":null,"dy":1}"#,
            r#"{"action":"get_seeds","n":1e300}"#,
        ] {
            assert_eq!(Action::parse(Some(raw)), Action::Wait, "input: {raw:?}");
        }
    }

    #[test]
    fn out_of_range_offsets_survive_parsing() {
        assert_eq!(
            Action::parse(Some(r#"{"action":"move","dx":5}"#)),
            Action::Move { dx: 5, dy: 0 }
        );
    }

    #[test]
    fn line_shape() {
        assert_eq!(
            Action::Move { dx: 1, dy: 0 }.to_line(),
            r#"{"action":"move","dx":1,"dy":0}"#
        );
        assert_eq!(Action::Deposit.to_line(), r#"{"action":"deposit"}"#);
    }
}
