//! Job description documents
//!
//! Renders the key=value document handed to `dirac-wms-job-submit` and keeps
//! the banned-site list of each command so already published documents can be
//! patched in place when new faulty sites show up.

use gridrun_core::dto::job::env;
use rand::Rng;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use crate::config::Config;

const BANNED_SITE_FIELD: &str = "BannedSite";

/// Result type alias for document operations
pub type Result<T> = std::result::Result<T, GenerateError>;

/// Errors raised while rendering or patching a document
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Invalid value '{value}' for override '{key}'")]
    InvalidOverride { key: String, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Insertion-ordered set of banned sites
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BannedSites {
    sites: Vec<String>,
}

impl BannedSites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a comma-joined list, skipping blanks and duplicates
    pub fn parse(value: &str) -> Self {
        let mut sites = Self::new();
        sites.extend(value.split(','));
        sites
    }

    /// Adds a site, returning whether it was new
    pub fn insert(&mut self, site: &str) -> bool {
        let site = site.trim();
        if site.is_empty() || self.contains(site) {
            return false;
        }
        self.sites.push(site.to_string());
        true
    }

    pub fn extend<'a>(&mut self, sites: impl IntoIterator<Item = &'a str>) {
        for site in sites {
            self.insert(site);
        }
    }

    pub fn contains(&self, site: &str) -> bool {
        self.sites.iter().any(|s| s == site)
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.sites.iter().map(String::as_str)
    }

    pub fn join(&self) -> String {
        self.sites.join(",")
    }
}

/// Base name of a script, used for document and job names
pub fn script_base(script_name: &str) -> &str {
    script_name.split('.').next().unwrap_or(script_name)
}

/// Renders and patches job description documents
pub struct JobDescriptionGenerator {
    simulation_id: String,
    script_dir: PathBuf,
    inv_dir: PathBuf,
    config_dir: PathBuf,
    workflow_file: PathBuf,
    jdl_dir: PathBuf,
    balance_enabled: bool,
    default_cpu_time: u32,
    default_priority: i32,
    banned_sites: Vec<String>,
    lightweight_workflow: bool,
    /// Static and dynamic bans known for each command, without the
    /// per-submission overrides of any single document
    banned_by_command: HashMap<String, BannedSites>,
}

impl JobDescriptionGenerator {
    pub fn new(config: &Config) -> Self {
        let layout = config.with_absolute_workspace();

        Self {
            simulation_id: config.simulation_id.clone(),
            script_dir: layout.script_dir(),
            inv_dir: layout.inv_dir(),
            config_dir: layout.config_dir(),
            workflow_file: layout.workflow_file(),
            jdl_dir: layout.jdl_dir(),
            balance_enabled: config.balance_enabled,
            default_cpu_time: config.default_cpu_time,
            default_priority: config.default_priority,
            banned_sites: config.banned_sites.clone(),
            lightweight_workflow: config.lightweight_workflow,
            banned_by_command: HashMap::new(),
        }
    }

    /// Renders the document for `script_name`
    ///
    /// `overrides` carries the per-submission environment; `dynamic_banned`
    /// holds the sites currently banned for `command`.
    pub fn generate(
        &mut self,
        script_name: &str,
        command: &str,
        overrides: &HashMap<String, String>,
        dynamic_banned: &BTreeSet<String>,
    ) -> Result<String> {
        let base = script_base(script_name);

        let cpu_time = match overrides.get(env::MAX_CPU_TIME) {
            Some(value) => parse_override::<u32>(env::MAX_CPU_TIME, value)?,
            None => self.cpu_time(),
        };
        let priority = match overrides.get(env::PRIORITY) {
            Some(value) => parse_override::<i32>(env::PRIORITY, value)?,
            None => self.default_priority,
        };
        let site = overrides.get(env::SITE).map(String::as_str).unwrap_or("");
        let tags = overrides.get(env::TAGS).map(String::as_str).unwrap_or("");

        let mut shared = BannedSites::new();
        shared.extend(self.banned_sites.iter().map(String::as_str));
        shared.extend(dynamic_banned.iter().map(String::as_str));

        let mut banned = BannedSites::new();
        banned.extend(self.banned_sites.iter().map(String::as_str));
        if let Some(extra) = overrides.get(env::BANNED_SITE) {
            banned.extend(extra.split(','));
        }
        banned.extend(shared.iter());

        let mut inputs = vec![quote(&self.script_dir.join(script_name).display().to_string())];
        let mut outputs = vec![quote("std.out"), quote("std.err")];
        if self.lightweight_workflow {
            inputs.push(quote(
                &self
                    .inv_dir
                    .join(format!("{}-invocation.json", base))
                    .display()
                    .to_string(),
            ));
            inputs.push(quote(
                &self
                    .config_dir
                    .join(format!("{}-configuration.sh", base))
                    .display()
                    .to_string(),
            ));
            inputs.push(quote(&self.workflow_file.display().to_string()));
            outputs.push(quote(&format!("{}.provenance.json", script_name)));
        }

        let mut lines = vec![
            field("JobName", &quote(&format!("{} - {}", base, self.simulation_id))),
            field("Executable", &quote(script_name)),
            field("StdOutput", &quote("std.out")),
            field("StdError", &quote("std.err")),
            field("InputSandbox", &format!("{{{}}}", inputs.join(", "))),
            field("OutputSandbox", &format!("{{{}}}", outputs.join(", "))),
            field("CPUTime", &quote(&cpu_time.to_string())),
            field("Priority", &priority.to_string()),
            field("Site", &quote(site)),
            field(BANNED_SITE_FIELD, &quote(&banned.join())),
        ];
        if !tags.is_empty() {
            lines.push(field("Tags", &quote(tags)));
        }

        debug!(
            "Rendered description for {} (command {}, {} banned site(s))",
            script_name,
            command,
            banned.len()
        );
        self.banned_by_command.insert(command.to_string(), shared);

        let mut document = lines.join("\n");
        document.push('\n');
        Ok(document)
    }

    /// Writes a rendered document as `<jdl dir>/<file_name>.jdl`
    pub async fn publish(&self, file_name: &str, content: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.jdl_dir).await?;
        let path = self.document_path(file_name);
        fs::write(&path, content).await?;
        Ok(path)
    }

    pub fn document_path(&self, file_name: &str) -> PathBuf {
        self.jdl_dir.join(format!("{}.jdl", file_name))
    }

    /// Static and dynamic bans known for `command`
    pub fn banned_sites_for(&self, command: &str) -> Option<&BannedSites> {
        self.banned_by_command.get(command)
    }

    /// Appends banned sites to the `BannedSite` line of `document`
    ///
    /// The document keeps its own entries; sites known for `command` and
    /// `newly_banned` ones it lacks are appended after them. Returns whether
    /// the document was rewritten.
    pub async fn update_banned_sites(
        &mut self,
        document: &Path,
        command: &str,
        newly_banned: &BTreeSet<String>,
    ) -> Result<bool> {
        let content = fs::read_to_string(document).await?;

        let current = content
            .lines()
            .find_map(banned_site_value)
            .map(BannedSites::parse)
            .unwrap_or_default();

        self.banned_by_command
            .entry(command.to_string())
            .or_default()
            .extend(newly_banned.iter().map(String::as_str));

        let mut banned = current.clone();
        if let Some(known) = self.banned_sites_for(command) {
            banned.extend(known.iter());
        }
        if banned.len() == current.len() {
            debug!("{} already bans every known site of {}", document.display(), command);
            return Ok(false);
        }

        let replacement = field(BANNED_SITE_FIELD, &quote(&banned.join()));
        let mut patched: Vec<String> = content
            .lines()
            .map(|line| {
                if banned_site_value(line).is_some() {
                    replacement.clone()
                } else {
                    line.to_string()
                }
            })
            .collect();
        if !content.lines().any(|line| banned_site_value(line).is_some()) {
            patched.push(replacement);
        }

        let mut output = patched.join("\n");
        output.push('\n');
        fs::write(document, output).await?;

        info!(
            "Banned sites for {} updated in {}: {}",
            command,
            document.display(),
            banned.join()
        );
        Ok(true)
    }

    fn cpu_time(&self) -> u32 {
        if self.balance_enabled {
            self.default_cpu_time + rand::rng().random_range(0..10u32) * 900
        } else {
            self.default_cpu_time
        }
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| GenerateError::InvalidOverride {
            key: key.to_string(),
            value: value.to_string(),
        })
}

fn field(key: &str, value: &str) -> String {
    format!("{:<16}= {};", key, value)
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value)
}

/// Value of a `BannedSite` line, matched on the exact keyword
fn banned_site_value(line: &str) -> Option<&str> {
    let (key, value) = line.split_once('=')?;
    if key.trim() != BANNED_SITE_FIELD {
        return None;
    }
    Some(
        value
            .trim()
            .trim_end_matches(';')
            .trim()
            .trim_matches('"'),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(workspace: &Path) -> Config {
        let mut config = Config::new("GASW-Dirac-Plugin".to_string(), workspace.to_path_buf());
        config.default_priority = 0;
        config.banned_sites = vec![
            "first.banned.site".to_string(),
            "second.banned.site".to_string(),
        ];
        config
    }

    fn overrides(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_generate_default_document() {
        let dir = TempDir::new().unwrap();
        let mut generator = JobDescriptionGenerator::new(&config(dir.path()));

        let result = generator
            .generate(
                "scriptName.sh",
                "bet",
                &overrides(&[(env::SITE, "Strasbourg")]),
                &BTreeSet::new(),
            )
            .unwrap();

        assert_eq!(result.lines().count(), 10);
        assert!(result.contains("JobName         = \"scriptName - GASW-Dirac-Plugin\";"));
        assert!(result.contains("Executable      = \"scriptName.sh\";"));
        assert!(result.contains("StdOutput       = \"std.out\";"));
        assert!(result.contains("StdError        = \"std.err\";"));
        assert!(result.contains("OutputSandbox   = {\"std.out\", \"std.err\"};"));
        assert!(result.contains("CPUTime         = \"1800\";"));
        assert!(result.contains("Priority        = 0;"));
        assert!(result.contains("Site            = \"Strasbourg\";"));
        assert!(result.contains("BannedSite      = \"first.banned.site,second.banned.site\";"));
        assert!(!result.contains("Tags"));

        let inputs = result
            .lines()
            .find(|l| l.starts_with("InputSandbox"))
            .unwrap();
        assert!(inputs.ends_with("/sh/scriptName.sh\"};"));
    }

    #[test]
    fn test_generate_lightweight_workflow() {
        let dir = TempDir::new().unwrap();
        let mut config = config(dir.path());
        config.lightweight_workflow = true;
        let mut generator = JobDescriptionGenerator::new(&config);

        let result = generator
            .generate("scriptName.sh", "bet", &HashMap::new(), &BTreeSet::new())
            .unwrap();

        assert!(result.contains(
            "OutputSandbox   = {\"std.out\", \"std.err\", \"scriptName.sh.provenance.json\"};"
        ));
        let inputs: Vec<&str> = result
            .lines()
            .find(|l| l.starts_with("InputSandbox"))
            .unwrap()
            .split(',')
            .collect();
        assert_eq!(inputs.len(), 4);
        assert!(inputs[0].ends_with("/sh/scriptName.sh\""));
        assert!(inputs[1].ends_with("/inv/scriptName-invocation.json\""));
        assert!(inputs[2].ends_with("/config/scriptName-configuration.sh\""));
        assert!(inputs[3].ends_with("/workflow.json\"};"));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let dir = TempDir::new().unwrap();
        let mut generator = JobDescriptionGenerator::new(&config(dir.path()));
        let dynamic: BTreeSet<String> = ["faulty.site".to_string()].into();

        let result = generator
            .generate(
                "job.sh",
                "bet",
                &overrides(&[
                    (env::PRIORITY, "7"),
                    (env::MAX_CPU_TIME, "3600"),
                    (env::BANNED_SITE, "third.site,first.banned.site"),
                    (env::TAGS, "GPU"),
                ]),
                &dynamic,
            )
            .unwrap();

        assert_eq!(result.lines().count(), 11);
        assert!(result.contains("Priority        = 7;"));
        assert!(result.contains("CPUTime         = \"3600\";"));
        assert!(result.contains("Site            = \"\";"));
        assert!(result.contains(
            "BannedSite      = \"first.banned.site,second.banned.site,third.site,faulty.site\";"
        ));
        assert!(result.contains("Tags            = \"GPU\";"));

        let known: Vec<&str> = generator.banned_sites_for("bet").unwrap().iter().collect();
        assert_eq!(
            known,
            vec!["first.banned.site", "second.banned.site", "faulty.site"]
        );
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut generator = JobDescriptionGenerator::new(&config(dir.path()));

        let err = generator
            .generate(
                "job.sh",
                "bet",
                &overrides(&[(env::PRIORITY, "high")]),
                &BTreeSet::new(),
            )
            .unwrap_err();
        assert!(matches!(err, GenerateError::InvalidOverride { .. }));
    }

    #[test]
    fn test_cpu_time_jitter_stays_on_grid() {
        let dir = TempDir::new().unwrap();
        let mut config = config(dir.path());
        config.balance_enabled = true;
        let generator = JobDescriptionGenerator::new(&config);

        for _ in 0..50 {
            let cpu = generator.cpu_time();
            assert!(cpu >= 1800 && cpu <= 1800 + 9 * 900);
            assert_eq!((cpu - 1800) % 900, 0);
        }
    }

    fn banned_line(path: &Path) -> String {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .find(|line| line.starts_with("BannedSite "))
            .unwrap()
            .to_string()
    }

    async fn render(
        generator: &mut JobDescriptionGenerator,
        script_name: &str,
        overrides: &HashMap<String, String>,
    ) -> PathBuf {
        let content = generator
            .generate(script_name, "bet", overrides, &BTreeSet::new())
            .unwrap();
        generator
            .publish(script_base(script_name), &content)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_banned_site_patch_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut generator = JobDescriptionGenerator::new(&config(dir.path()));
        let path = render(&mut generator, "job.sh", &HashMap::new()).await;
        assert_eq!(path, dir.path().join("jdl").join("job.jdl"));
        let lines = std::fs::read_to_string(&path).unwrap().lines().count();

        let newly: BTreeSet<String> = ["bad.site".to_string()].into();
        assert!(generator.update_banned_sites(&path, "bet", &newly).await.unwrap());
        let once = std::fs::read_to_string(&path).unwrap();
        assert!(once.contains(
            "BannedSite      = \"first.banned.site,second.banned.site,bad.site\";"
        ));
        assert_eq!(once.lines().count(), lines);

        assert!(!generator.update_banned_sites(&path, "bet", &newly).await.unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), once);
    }

    #[tokio::test]
    async fn test_every_document_of_a_command_gets_the_ban() {
        let dir = TempDir::new().unwrap();
        let mut generator = JobDescriptionGenerator::new(&config(dir.path()));
        let a = render(&mut generator, "a.sh", &HashMap::new()).await;
        let b = render(&mut generator, "b.sh", &HashMap::new()).await;

        let newly: BTreeSet<String> = ["bad.site".to_string()].into();
        assert!(generator.update_banned_sites(&a, "bet", &newly).await.unwrap());
        assert!(generator.update_banned_sites(&b, "bet", &newly).await.unwrap());

        let expected = "BannedSite      = \"first.banned.site,second.banned.site,bad.site\";";
        assert_eq!(banned_line(&a), expected);
        assert_eq!(banned_line(&b), expected);
    }

    #[tokio::test]
    async fn test_known_bans_reach_documents_patched_later() {
        let dir = TempDir::new().unwrap();
        let mut generator = JobDescriptionGenerator::new(&config(dir.path()));
        let a = render(&mut generator, "a.sh", &HashMap::new()).await;
        let b = render(&mut generator, "b.sh", &HashMap::new()).await;

        let first: BTreeSet<String> = ["bad.site".to_string()].into();
        let second: BTreeSet<String> = ["worse.site".to_string()].into();
        assert!(generator.update_banned_sites(&a, "bet", &first).await.unwrap());
        assert!(generator.update_banned_sites(&b, "bet", &second).await.unwrap());

        assert_eq!(
            banned_line(&b),
            "BannedSite      = \"first.banned.site,second.banned.site,bad.site,worse.site\";"
        );
    }

    #[tokio::test]
    async fn test_patch_keeps_document_specific_bans() {
        let dir = TempDir::new().unwrap();
        let mut generator = JobDescriptionGenerator::new(&config(dir.path()));
        let a = render(
            &mut generator,
            "a.sh",
            &overrides(&[(env::BANNED_SITE, "only.for.a")]),
        )
        .await;
        let b = render(&mut generator, "b.sh", &HashMap::new()).await;

        let newly: BTreeSet<String> = ["bad.site".to_string()].into();
        assert!(generator.update_banned_sites(&a, "bet", &newly).await.unwrap());
        assert!(generator.update_banned_sites(&b, "bet", &newly).await.unwrap());

        assert_eq!(
            banned_line(&a),
            "BannedSite      = \"first.banned.site,second.banned.site,only.for.a,bad.site\";"
        );
        assert_eq!(
            banned_line(&b),
            "BannedSite      = \"first.banned.site,second.banned.site,bad.site\";"
        );
    }

    #[tokio::test]
    async fn test_patch_only_touches_banned_site_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.jdl");
        std::fs::write(
            &path,
            "Site            = \"a\";\nBannedSiteList  = \"keep\";\nBannedSite      = \"x\";\n",
        )
        .unwrap();

        let mut generator = JobDescriptionGenerator::new(&config(dir.path()));
        let newly: BTreeSet<String> = ["y".to_string()].into();
        assert!(generator.update_banned_sites(&path, "unknown", &newly).await.unwrap());

        let patched = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            patched,
            "Site            = \"a\";\nBannedSiteList  = \"keep\";\nBannedSite      = \"x,y\";\n"
        );
    }

    #[test]
    fn test_banned_sites_set() {
        let mut sites = BannedSites::parse("b, a,,b");
        assert_eq!(sites.join(), "b,a");
        assert!(!sites.insert("a"));
        assert!(sites.insert("c"));
        assert_eq!(sites.iter().collect::<Vec<_>>(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_script_base() {
        assert_eq!(script_base("scriptName.sh"), "scriptName");
        assert_eq!(script_base("noext"), "noext");
    }
}
