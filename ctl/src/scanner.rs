use forgectl_common::errors::*;
use forgectl_common::utils;
use forgectl_common::{Category, OneOrMany, Recipe, RecipeHeader};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub struct Scanner {
    repo_path: PathBuf,
}

fn is_recipe(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.ends_with(".disabled") {
        return false;
    }
    name.ends_with(".yaml") || name.ends_with(".yml")
}

fn first_or_empty(field: &Option<OneOrMany>) -> String {
    field
        .as_ref()
        .and_then(|f| f.first())
        .unwrap_or("")
        .to_string()
}

impl Scanner {
    pub fn new<P: Into<PathBuf>>(repo_path: P) -> Scanner {
        Scanner {
            repo_path: repo_path.into(),
        }
    }

    /// Walk `binaries/` and `packages/` and collect every enabled recipe.
    pub fn scan_all(&self) -> Result<Vec<Recipe>> {
        let mut recipes = Vec::new();
        for category in [Category::Binaries, Category::Packages] {
            recipes.extend(self.scan_category(category)?);
        }
        Ok(recipes)
    }

    fn scan_category(&self, category: Category) -> Result<Vec<Recipe>> {
        let root = self.repo_path.join(category.as_ref());
        if !root.is_dir() {
            warn!("Recipe directory {:?} does not exist, skipping", root);
            return Ok(Vec::new());
        }

        let mut recipes = Vec::new();
        for entry in WalkDir::new(&root) {
            let entry = entry?;
            if !entry.file_type().is_file() || !is_recipe(entry.path()) {
                continue;
            }

            match self.parse_recipe(entry.path(), category) {
                Ok(recipe) => recipes.push(recipe),
                Err(err) => warn!("Failed to parse {:?}, skipping: {:#}", entry.path(), err),
            }
        }

        Ok(recipes)
    }

    fn parse_recipe(&self, path: &Path, category: Category) -> Result<Recipe> {
        let rel_path = path
            .strip_prefix(&self.repo_path)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();

        let content = fs::read_to_string(path).context("Failed to read recipe")?;
        let header = serde_yaml::from_str::<RecipeHeader>(&content)
            .context("Failed to parse recipe header")?;

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_string();
        let parent = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string();

        // packages live one directory per package, binaries are flat files
        let fallback = match category {
            Category::Packages if parent != category.as_ref() => parent.clone(),
            _ => stem,
        };

        let non_empty = |field: &Option<String>| field.clone().filter(|s| !s.is_empty());

        let name = non_empty(&header.pkg_name)
            .or_else(|| non_empty(&header.pkg))
            .or_else(|| non_empty(&header.pkg_id))
            .unwrap_or_else(|| fallback.clone());
        let pkg_id = non_empty(&header.pkg_id).unwrap_or_else(|| fallback.clone());
        let family = non_empty(&header.pkg_family)
            .unwrap_or_else(|| if parent.is_empty() { fallback.clone() } else { parent });

        Ok(Recipe {
            pkg_id,
            name,
            family,
            category,
            version: header.version.clone().unwrap_or_default(),
            description: header.description.clone().unwrap_or_default(),
            homepage: first_or_empty(&header.homepage),
            src_url: first_or_empty(&header.src_url),
            provides: header.provides.clone(),
            build_type: utils::build_type(&rel_path),
            build_script: rel_path,
            file_path: path.to_path_buf(),
        })
    }

    /// Find a single recipe by name: exact pkg_id, exact name, substring of
    /// pkg_id, then `/name/` in the recipe path. First hit wins.
    pub fn scan_by_package(&self, pkg_name: &str) -> Result<Recipe> {
        let recipes = self.scan_all()?;

        let needle = format!("/{}/", pkg_name);
        let probes: [&dyn Fn(&Recipe) -> bool; 4] = [
            &|r| r.pkg_id == pkg_name,
            &|r| r.name == pkg_name,
            &|r| r.pkg_id.contains(pkg_name),
            &|r| r.build_script.contains(&needle),
        ];

        for probe in probes {
            if let Some(recipe) = recipes.iter().find(|r| probe(r)) {
                return Ok(recipe.clone());
            }
        }

        bail!("Package not found: {}", pkg_name)
    }

    /// Count enabled recipes per category.
    pub fn recipe_counts(&self) -> Result<(usize, usize)> {
        let recipes = self.scan_all()?;
        let binaries = recipes
            .iter()
            .filter(|r| r.category == Category::Binaries)
            .count();
        Ok((binaries, recipes.len() - binaries))
    }
}
