//! Project Autoload
//!
//! Loads projects from a directory at startup: each subdirectory is one
//! project, its `*.js` files are the module set, and `index.js` is the
//! entry. Projects without an entry file are skipped.

use std::collections::HashMap;
use std::path::Path;

use crate::cell::ProjectSource;

pub struct ProjectLoader;

impl ProjectLoader {
    /// Load every project under `root`, sorted by project id.
    pub async fn load_dir(root: &Path) -> std::io::Result<Vec<(String, ProjectSource)>> {
        let mut projects = Vec::new();

        let mut entries = tokio::fs::read_dir(root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let project_id = entry.file_name().to_string_lossy().into_owned();
            match Self::load_project(&entry.path()).await? {
                Some(source) => projects.push((project_id, source)),
                None => {
                    tracing::warn!(project_id = %project_id, "skipping project without index.js");
                }
            }
        }

        projects.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(projects)
    }

    async fn load_project(dir: &Path) -> std::io::Result<Option<ProjectSource>> {
        let mut files = HashMap::new();

        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("js") {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            files.insert(name, tokio::fs::read_to_string(&path).await?);
        }

        if !files.contains_key("index.js") {
            return Ok(None);
        }
        Ok(Some(ProjectSource::new("index.js", files)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_projects_with_entries() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("alpha");
        std::fs::create_dir(&a).unwrap();
        std::fs::write(a.join("index.js"), "app.get('/', () => 1)").unwrap();
        std::fs::write(a.join("utils.js"), "exports({})").unwrap();
        std::fs::write(a.join("notes.txt"), "not a module").unwrap();

        let b = dir.path().join("beta");
        std::fs::create_dir(&b).unwrap();
        std::fs::write(b.join("main.js"), "// no index.js here").unwrap();

        let projects = ProjectLoader::load_dir(dir.path()).await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].0, "alpha");
        assert_eq!(projects[0].1.entry, "index.js");
        assert_eq!(projects[0].1.files.len(), 2);
    }
}
