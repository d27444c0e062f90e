mod annotation;
mod builder;
mod docblock;

use serde::Deserialize;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use utoipa::openapi::OpenApi;
use walkdir::WalkDir;

use self::{annotation::parse_docblock, builder::DocumentBuilder, docblock::extract_docblocks};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan target {} does not exist", .0.display())]
    MissingTarget(PathBuf),
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to walk {}: {source}", .path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("{}:{line}: malformed annotation: {message}", .path.display())]
    Syntax {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("{}:{line}: {message}", .path.display())]
    Invalid {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

/// Turns a set of source locations into an API description.
pub trait Scanner: Send + Sync {
    fn scan(&self, target: &ScanTarget) -> Result<OpenApi, ScanError>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Skipped during traversal. Relative entries resolve against each scanned directory,
    /// absolute ones apply as given.
    pub exclude: Vec<PathBuf>,
    pub extensions: Vec<String>,
    pub namespaces: Vec<String>,
    pub follow_links: bool,
    /// Fallback `info.title` when no `Info` annotation is found.
    pub title: String,
    pub version: String,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            extensions: ["php", "rs", "ts", "js", "java", "py"]
                .into_iter()
                .map(String::from)
                .collect(),
            namespaces: vec!["OA".to_string(), "SWG".to_string()],
            follow_links: true,
            title: "API".to_string(),
            version: "1.0.0".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanTarget {
    paths: Vec<PathBuf>,
    options: ScanOptions,
}

impl ScanTarget {
    pub fn new<I, P>(paths: I, options: ScanOptions) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            options,
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }
}

/// Scanner for swagger-php style docblock annotations (`@OA\Get(...)`, `@SWG\Response(...)`).
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotationScanner;

impl Scanner for AnnotationScanner {
    fn scan(&self, target: &ScanTarget) -> Result<OpenApi, ScanError> {
        let options = target.options();
        let mut builder = DocumentBuilder::new(options);
        let mut files_scanned = 0usize;

        for root in target.paths() {
            for file in source_files(root, options)? {
                scan_file(&file, options, &mut builder)?;
                files_scanned += 1;
            }
        }

        tracing::debug!(files = files_scanned, "annotation scan finished");
        Ok(builder.build())
    }
}

fn source_files(root: &Path, options: &ScanOptions) -> Result<Vec<PathBuf>, ScanError> {
    let metadata = match fs::metadata(root) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(ScanError::MissingTarget(root.to_path_buf()));
        }
        Err(source) => {
            return Err(ScanError::Io {
                path: root.to_path_buf(),
                source,
            });
        }
    };
    if metadata.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    // Walk from an absolute root so absolute exclude entries match relative targets.
    let root = std::path::absolute(root).map_err(|source| ScanError::Io {
        path: root.to_path_buf(),
        source,
    })?;
    let root = root.as_path();
    let excluded: Vec<PathBuf> = options
        .exclude
        .iter()
        .map(|entry| {
            if entry.is_absolute() {
                entry.clone()
            } else {
                root.join(entry)
            }
        })
        .collect();

    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !(is_hidden(entry.path()) || is_excluded(entry.path(), &excluded))
        })
    {
        let entry = entry.map_err(|source| ScanError::Walk {
            path: root.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_dir() {
            continue;
        }
        if has_allowed_extension(entry.path(), &options.extensions) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn scan_file(
    path: &Path,
    options: &ScanOptions,
    builder: &mut DocumentBuilder<'_>,
) -> Result<(), ScanError> {
    let bytes = fs::read(path).map_err(|source| ScanError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let source = String::from_utf8_lossy(&bytes);

    for block in extract_docblocks(&source) {
        let annotations =
            parse_docblock(&block.text, block.line, &options.namespaces).map_err(|err| {
                ScanError::Syntax {
                    path: path.to_path_buf(),
                    line: err.line,
                    message: err.message,
                }
            })?;
        for annotation in &annotations {
            builder.add(path, annotation)?;
        }
    }
    Ok(())
}

fn has_allowed_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            extensions
                .iter()
                .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
        })
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

fn is_excluded(path: &Path, excluded: &[PathBuf]) -> bool {
    excluded.iter().any(|prefix| path.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{USER_CONTROLLER, write_file};
    use serde_json::json;
    use tempfile::TempDir;

    fn scan_dir(dir: &Path, options: ScanOptions) -> Result<serde_json::Value, ScanError> {
        let target = ScanTarget::new([dir], options);
        let document = AnnotationScanner.scan(&target)?;
        Ok(serde_json::to_value(&document).unwrap())
    }

    #[test]
    // A directory holding one controller with a documented GET /user yields exactly that path,
    // with the 200 response bound to the User schema.
    fn scans_user_controller() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "controllers/UserController.php", USER_CONTROLLER);

        let document = scan_dir(dir.path(), ScanOptions::default()).unwrap();
        let paths = document["paths"].as_object().unwrap();

        assert_eq!(paths.len(), 1);
        let user = paths["/user"].as_object().unwrap();
        assert_eq!(user.keys().collect::<Vec<_>>(), vec!["get"]);
        assert_eq!(
            user["get"]["responses"]["200"]["content"]["application/json"]["schema"],
            json!({ "$ref": "#/components/schemas/User" })
        );
        assert_eq!(user["get"]["tags"], json!(["User"]));
    }

    #[test]
    // Sources without annotations still produce a well-formed document with no paths.
    fn empty_directory_yields_minimal_document() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "plain.php", "<?php\n/** just prose */\nfunction f() {}\n");

        let document = scan_dir(dir.path(), ScanOptions::default()).unwrap();

        assert_eq!(document["paths"], json!({}));
        assert_eq!(document["info"]["title"], "API");
        assert_eq!(document["info"]["version"], "1.0.0");
        assert!(document["openapi"].is_string());
    }

    #[test]
    fn missing_target_fails() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");

        let err = scan_dir(&missing, ScanOptions::default()).unwrap_err();

        assert!(matches!(err, ScanError::MissingTarget(ref path) if path == &missing));
    }

    #[test]
    fn malformed_annotation_reports_file_and_line() {
        let dir = TempDir::new().unwrap();
        let file = write_file(
            dir.path(),
            "Broken.php",
            "<?php\n\n/**\n * @OA\\Get(path=\"/x\" summary=\"s\")\n */\n",
        );

        let err = scan_dir(dir.path(), ScanOptions::default()).unwrap_err();

        match err {
            ScanError::Syntax { path, line, .. } => {
                assert_eq!(path, file);
                assert_eq!(line, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    // Hidden directories, excluded paths and foreign extensions are all skipped.
    fn honours_exclusions_and_extensions() {
        let dir = TempDir::new().unwrap();
        let get = |path: &str| format!("<?php\n/**\n * @OA\\Get(path=\"{path}\")\n */\n");
        write_file(dir.path(), "api/Items.php", &get("/items"));
        write_file(dir.path(), "vendor/Lib.php", &get("/vendor"));
        write_file(dir.path(), ".cache/Old.php", &get("/hidden"));
        write_file(dir.path(), "notes.txt", &get("/notes"));

        let options = ScanOptions {
            exclude: vec![PathBuf::from("vendor")],
            extensions: vec![".PHP".to_string()],
            ..ScanOptions::default()
        };
        let document = scan_dir(dir.path(), options).unwrap();
        let paths: Vec<_> = document["paths"].as_object().unwrap().keys().cloned().collect();

        assert_eq!(paths, vec!["/items".to_string()]);
    }

    #[test]
    fn absolute_exclude_applies_to_relative_target() {
        let dir = tempfile::Builder::new()
            .prefix("scan-root")
            .tempdir_in(".")
            .unwrap();
        let get = |path: &str| format!("<?php\n/**\n * @OA\\Get(path=\"{path}\")\n */\n");
        write_file(dir.path(), "api/Items.php", &get("/items"));
        write_file(dir.path(), "vendor/Lib.php", &get("/vendor"));
        let relative = PathBuf::from(dir.path().file_name().unwrap());
        assert!(relative.is_relative());

        let options = ScanOptions {
            exclude: vec![std::path::absolute(dir.path().join("vendor")).unwrap()],
            ..ScanOptions::default()
        };
        let document = scan_dir(&relative, options).unwrap();
        let paths: Vec<_> = document["paths"].as_object().unwrap().keys().cloned().collect();

        assert_eq!(paths, vec!["/items".to_string()]);
    }

    #[test]
    // An explicit file target is scanned even when its extension is not in the list.
    fn explicit_file_target_ignores_extension_filter() {
        let dir = TempDir::new().unwrap();
        let file = write_file(
            dir.path(),
            "routes.inc",
            "/**\n * @OA\\Post(path=\"/login\")\n */\n",
        );

        let document = scan_dir(&file, ScanOptions::default()).unwrap();

        assert!(document["paths"]["/login"]["post"].is_object());
    }

    #[test]
    // Annotations spread over several targets merge into one document.
    fn merges_multiple_targets() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write_file(first.path(), "A.php", "/**\n * @OA\\Get(path=\"/a\")\n */");
        write_file(second.path(), "B.php", "/**\n * @OA\\Delete(path=\"/a\")\n */");

        let target = ScanTarget::new([first.path(), second.path()], ScanOptions::default());
        let document = serde_json::to_value(AnnotationScanner.scan(&target).unwrap()).unwrap();

        assert!(document["paths"]["/a"]["get"].is_object());
        assert!(document["paths"]["/a"]["delete"].is_object());
    }

    #[test]
    // Repeated scans of unchanged sources serialize to identical bytes.
    fn scan_output_is_deterministic() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "b/UserController.php", USER_CONTROLLER);
        write_file(dir.path(), "a/Health.php", "/**\n * @OA\\Get(path=\"/health\")\n */");
        let target = ScanTarget::new([dir.path()], ScanOptions::default());

        let first = serde_json::to_string(&AnnotationScanner.scan(&target).unwrap()).unwrap();
        let second = serde_json::to_string(&AnnotationScanner.scan(&target).unwrap()).unwrap();

        assert_eq!(first, second);
    }
}
