use crate::error::AppLockError;
use crate::shell::exec;

pub trait LockedPackageSource: Send {
    /// Fetches the current locked set. Every call is a fresh round trip.
    fn locked_packages(&self) -> Result<Vec<String>, AppLockError>;
}

/// Queries a content provider through the `content` shell tool.
pub struct ContentProviderQuery {
    uri: String,
    column: String,
}

impl ContentProviderQuery {
    pub fn new(uri: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            column: column.into(),
        }
    }
}

impl LockedPackageSource for ContentProviderQuery {
    fn locked_packages(&self) -> Result<Vec<String>, AppLockError> {
        let output = exec("content", ["query", "--uri", self.uri.as_str()])?;
        parse_rows(output.as_str(), self.column.as_str()).ok_or_else(|| {
            AppLockError::MissingColumn {
                uri: self.uri.clone(),
                column: self.column.clone(),
            }
        })
    }
}

/*
output:
Row: 0 _id=1, package_name=com.x.social, name=Social, icon=NULL
Row: 1 _id=2, package_name=com.y.game, name=Game, icon=NULL
*/
/// Returns `None` when rows exist but none of them carries `column`.
fn parse_rows(output: &str, column: &str) -> Option<Vec<String>> {
    let key = format!("{column}=");
    let mut rows = 0;
    let mut seen_column = false;
    let mut packages = Vec::new();

    for line in output.lines().filter(|line| line.starts_with("Row:")) {
        rows += 1;
        let Some(value) = column_value(line, key.as_str()) else {
            continue;
        };
        seen_column = true;
        if value != "NULL" && !value.is_empty() {
            packages.push(value.to_string());
        }
    }

    if rows > 0 && !seen_column {
        return None;
    }
    Some(packages)
}

fn column_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    // columns are separated by ", " and the first one follows the row index
    let start = line
        .match_indices(key)
        .find(|(idx, _)| line[..*idx].ends_with(' '))
        .map(|(idx, _)| idx + key.len())?;
    let rest = &line[start..];
    let end = rest.find(", ").unwrap_or(rest.len());
    Some(rest[..end].trim())
}
