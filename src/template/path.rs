//! Template path arithmetic

/// Split a `file@alias` reference into its file and optional repository alias
pub fn split_file_ref(file_ref: &str) -> (&str, Option<&str>) {
    match file_ref.split_once('@') {
        Some((file, alias)) => (file, Some(alias)),
        None => (file_ref, None),
    }
}

/// Resolve `path` against the directory `base`
///
/// `.` and empty segments are dropped and `..` removes the previous segment
/// (it is ignored at the top). A leading `/` on the combined path is kept.
pub fn relative_to(base: &str, path: &str) -> String {
    let combined = if path.starts_with('/') || base.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", base, path)
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in combined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if combined.starts_with('/') {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Directory containing `path`; `.` for bare file names
pub fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(index) => path[..index].to_string(),
        None => ".".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_to_parent_directory() {
        assert_eq!(relative_to("/a/b", "../c.yml"), "/a/c.yml");
    }

    #[test]
    fn test_relative_to_current_directory() {
        assert_eq!(relative_to(".", "sub/../x.yml"), "x.yml");
        assert_eq!(relative_to(".", "./templates/steps.yml"), "templates/steps.yml");
    }

    #[test]
    fn test_rooted_path_ignores_base() {
        assert_eq!(relative_to("templates", "/shared/jobs.yml"), "/shared/jobs.yml");
    }

    #[test]
    fn test_parent_segments_stop_at_root() {
        assert_eq!(relative_to("/a", "../../b.yml"), "/b.yml");
        assert_eq!(relative_to(".", "../b.yml"), "b.yml");
    }

    #[test]
    fn test_split_file_ref() {
        assert_eq!(split_file_ref("steps.yml@tools"), ("steps.yml", Some("tools")));
        assert_eq!(split_file_ref("steps.yml"), ("steps.yml", None));
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("templates/jobs.yml"), "templates");
        assert_eq!(parent_dir("jobs.yml"), ".");
        assert_eq!(parent_dir("/jobs.yml"), "/");
    }
}
