//! Remote path → local path mapping

use std::path::{Path, PathBuf};

/// Make one path component safe on every common filesystem.
///
/// `<` `>` become `(` `)`, `"` becomes `'`, each of `: / \ | ? *` becomes
/// `_`, and a trailing dot or space gets a `_` appended.
pub fn sanitize_component(component: &str) -> String {
    let mut out: String = component
        .chars()
        .map(|c| match c {
            '<' => '(',
            '>' => ')',
            '"' => '\'',
            ':' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if out.ends_with('.') || out.ends_with(' ') {
        out.push('_');
    }
    out
}

/// Sanitized relative path for a remote path, empty components dropped
pub fn sanitize_path(remote_path: &str) -> PathBuf {
    remote_path
        .split('/')
        .filter(|c| !c.is_empty())
        .map(sanitize_component)
        .collect()
}

/// Where the raw copy and the artifact of a remote path live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapper {
    remote_root: String,
    mirror_dir: PathBuf,
    output_dir: PathBuf,
}

impl PathMapper {
    pub fn new(
        remote_root: impl Into<String>,
        mirror_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            remote_root: remote_root.into(),
            mirror_dir: mirror_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn mirror_dir(&self) -> &Path {
        &self.mirror_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path relative to the mirrored root, sanitized. A leading slash on
    /// either side is ignored.
    pub fn relative(&self, remote_path: &str) -> PathBuf {
        let root = self.remote_root.trim_matches('/');
        let path = remote_path.trim_start_matches('/');
        let rest = if root.is_empty() {
            path
        } else {
            match path.strip_prefix(root) {
                Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
                _ => path,
            }
        };
        sanitize_path(rest)
    }

    /// `<mirror_dir>/<relative>`
    pub fn raw_path(&self, remote_path: &str) -> PathBuf {
        self.mirror_dir.join(self.relative(remote_path))
    }

    /// `<output_dir>/<relative>.md`, original extension kept
    pub fn artifact_path(&self, remote_path: &str) -> PathBuf {
        let mut path = self.output_dir.join(self.relative(remote_path)).into_os_string();
        path.push(".md");
        PathBuf::from(path)
    }
}

/// `<path>.part`, the name a download is written under until complete
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("a<b>c"), "a(b)c");
        assert_eq!(sanitize_component("say \"hi\""), "say 'hi'");
        assert_eq!(sanitize_component("Q1: plan|v2?*"), "Q1_ plan_v2__");
        assert_eq!(sanitize_component("back\\slash"), "back_slash");
        assert_eq!(sanitize_component("ends with dot."), "ends with dot._");
        assert_eq!(sanitize_component("ends with space "), "ends with space _");
        assert_eq!(sanitize_component(".."), ".._");
        assert_eq!(sanitize_component("Отчёт 2024.xlsx"), "Отчёт 2024.xlsx");
    }

    #[test]
    fn test_sanitize_path_drops_empty_components() {
        assert_eq!(
            sanitize_path("//Clients//Acme: Inc/report?.pdf"),
            PathBuf::from("Clients").join("Acme_ Inc").join("report_.pdf")
        );
    }

    #[test]
    fn test_mapping_under_root() {
        let mapper = PathMapper::new("/Clients", "/data/raw", "/data/md");
        assert_eq!(
            mapper.raw_path("/Clients/acme/report.pdf"),
            PathBuf::from("/data/raw/acme/report.pdf")
        );
        assert_eq!(
            mapper.artifact_path("/Clients/acme/report.pdf"),
            PathBuf::from("/data/md/acme/report.pdf.md")
        );
        // Sibling folder sharing the prefix is not under the root
        assert_eq!(
            mapper.raw_path("/ClientsOld/a.txt"),
            PathBuf::from("/data/raw/ClientsOld/a.txt")
        );
    }

    #[test]
    fn test_mapping_at_disk_root() {
        let mapper = PathMapper::new("/", "raw", "md");
        assert_eq!(mapper.raw_path("/a/b.csv"), PathBuf::from("raw/a/b.csv"));
        assert_eq!(part_path(Path::new("raw/a/b.csv")), PathBuf::from("raw/a/b.csv.part"));
    }

    #[test]
    fn test_mapping_ignores_leading_slash() {
        let mapper = PathMapper::new("/Clients", "raw", "md");
        assert_eq!(mapper.raw_path("Clients/acme/a.csv"), PathBuf::from("raw/acme/a.csv"));
        assert_eq!(mapper.raw_path("/Clients/acme/a.csv"), PathBuf::from("raw/acme/a.csv"));
    }
}
