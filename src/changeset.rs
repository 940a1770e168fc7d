/// kind of change reported by `git diff --name-status`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    Added,
    Modified,
    Renamed,
    Copied,
}

impl ChangeStatus {
    /// map a name-status token (`A`, `M`, `R087`, `C100`, ...) to a status
    /// returns None for statuses we never deliver (deletions, type changes, etc.)
    pub fn from_token(token: &str) -> Option<Self> {
        match token.chars().next()? {
            'A' => Some(Self::Added),
            'M' => Some(Self::Modified),
            'R' => Some(Self::Renamed),
            'C' => Some(Self::Copied),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::Added => 'A',
            Self::Modified => 'M',
            Self::Renamed => 'R',
            Self::Copied => 'C',
        }
    }
}

/// a single changed file, as reported by the change detector
///
/// for renames and copies `path` is the new path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEntry {
    pub status: ChangeStatus,
    pub path: String,
}

/// whether a path looks like a yaml file
pub fn is_yaml(path: &str) -> bool {
    let lower = path.to_lowercase();
    lower.ends_with(".yml") || lower.ends_with(".yaml")
}
