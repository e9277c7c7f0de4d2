use crate::model::FileChange;

/// Two-letter avatar initials: first and last word, or the first two
/// letters of a single word. `??` when nothing usable is left.
pub fn initials(name: &str) -> String {
    let parts: Vec<&str> = name.split_whitespace().collect();
    let letters: String = match parts.as_slice() {
        [first, .., last] => first.chars().take(1).chain(last.chars().take(1)).collect(),
        [single] if single.chars().count() >= 2 => single.chars().take(2).collect(),
        _ => return "??".to_string(),
    };
    letters.to_uppercase()
}

/// Directory part of a repository path with a trailing `/`; `None` at the root.
pub fn parent_dir(path: &str) -> Option<String> {
    let (dir, _) = path.rsplit_once('/')?;
    if dir.is_empty() {
        None
    } else {
        Some(format!("{dir}/"))
    }
}

pub fn files_matching<'a>(
    files: &'a [FileChange],
    path_prefix: Option<&'a str>,
) -> impl Iterator<Item = &'a FileChange> + 'a {
    files.iter().filter(move |fc| {
        if let Some(prefix) = path_prefix {
            fc.path.starts_with(prefix)
        } else {
            true
        }
    })
}
