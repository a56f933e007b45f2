use std::sync::LazyLock;

use regex::Regex;

use super::{ReleaseState, ReleaseStatus};

/// Release history records are stored as `<release>.v<revision>`.
static RECORD_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*)\.v([0-9]+)$").expect("record name pattern is valid")
});

/// Parse the output of `helm history <release> --max 1`.
///
/// ```text
/// REVISION  UPDATED                   STATUS      CHART                DESCRIPTION
/// 1         Fri Jul 14 18:25:00 2017  SUPERSEDED  symfony-demo-0.1.0   Install complete
/// ```
///
/// Columns are tab separated; the last line is the most recent record.
pub fn parse_history(stdout: &str) -> Result<ReleaseStatus, String> {
    let last_line = stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| "empty history output".to_owned())?;

    let fields: Vec<&str> = last_line.splitn(5, '\t').collect();
    if fields.len() < 3 {
        return Err(format!("unexpected history record '{last_line}'"));
    }

    let revision_field = fields[0].trim();
    let revision = revision_field
        .parse::<u32>()
        .map_err(|e| format!("bad revision '{revision_field}': {e}"))?;

    Ok(ReleaseStatus {
        revision,
        state: ReleaseState::parse(fields[2].trim()),
    })
}

/// Whether helm stderr means the release does not exist.
///
/// Helm 2 has no dedicated exit code for this, so the first stderr line is
/// matched for both an `Error:` marker and `not found`. This couples us to
/// helm's message wording.
pub fn is_not_found(stderr: &str) -> bool {
    let first_line = stderr.lines().next().unwrap_or_default();
    first_line.contains("Error:") && first_line.contains("not found")
}

/// Split a record name into release name and revision.
pub fn parse_record_name(name: &str) -> Option<(&str, u32)> {
    let caps = RECORD_NAME.captures(name)?;
    let release = caps.get(1)?.as_str();
    let revision = caps.get(2)?.as_str().parse().ok()?;
    Some((release, revision))
}
