// FILE: src/cli/mod.rs

mod handlers;

use crate::error::Result;
use crate::options::{self, Options, ResolvedOptions};
use crate::renderer::RendererRegistry;
use clap::{Arg, ArgAction, Command};
use std::path::Path;
use std::time::Instant;

pub const DEFAULT_ARCH: &str = "web.browser";
pub const DEFAULT_OUT_DIR: &str = ".cssmc/out";
pub const DEFAULT_CACHE_DIR: &str = ".cssmc/cache";

pub struct CssmcCli {
    config_path: Option<String>,
    start_time: Instant,
}

impl Default for CssmcCli {
    fn default() -> Self {
        Self::new()
    }
}

impl CssmcCli {
    pub fn new() -> Self {
        Self {
            config_path: None,
            start_time: Instant::now(),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        self.start_time = Instant::now();
        let matches = self.build_cli().get_matches();

        self.config_path = matches.get_one::<String>("config").cloned();
        self.setup_logging(matches.get_count("verbose"))?;

        match matches.subcommand() {
            Some(("build", sub_matches)) => handlers::handle_build_command(self, sub_matches),
            Some(("check", sub_matches)) => handlers::handle_check_command(self, sub_matches),
            Some(("watch", sub_matches)) => handlers::handle_watch_command(self, sub_matches),
            _ => {
                println!("No subcommand specified. Use --help for usage information.");
                Ok(())
            }
        }
    }

    fn build_cli(&self) -> Command {
        let project_arg = || {
            Arg::new("project")
                .help("Project directory")
                .default_value(".")
                .index(1)
        };
        let arch_arg = || {
            Arg::new("arch")
                .long("arch")
                .value_name("ARCH")
                .help("Architecture of the compile unit")
                .default_value(DEFAULT_ARCH)
        };
        let output_arg = || {
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Directory the artifacts are written to")
        };

        Command::new(crate::NAME)
            .version(crate::VERSION)
            .about(crate::DESCRIPTION)
            .author("cssmc Development Team")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file (.json, .toml or package.json)")
                    .global(true)
                    .action(ArgAction::Set),
            )
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .help("Increase verbosity (can be used multiple times)")
                    .global(true)
                    .action(ArgAction::Count),
            )
            .subcommand(
                Command::new("build")
                    .about("Compile every stylesheet in a project and write the artifacts")
                    .arg(project_arg())
                    .arg(output_arg())
                    .arg(arch_arg())
                    .arg(Arg::new("no-cache").long("no-cache").help("Do not read or write the persistent cache").action(ArgAction::SetTrue)),
            )
            .subcommand(
                Command::new("check")
                    .about("Compile every stylesheet without writing anything; fails if any file fails")
                    .arg(project_arg())
                    .arg(arch_arg()),
            )
            .subcommand(
                Command::new("watch")
                    .about("Rebuild whenever a file in the project changes")
                    .arg(project_arg())
                    .arg(output_arg())
                    .arg(arch_arg()),
            )
    }

    fn setup_logging(&self, verbose_count: u8) -> Result<()> {
        let log_level = match verbose_count {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };
        env_logger::Builder::from_default_env()
            .filter_level(log_level)
            .format_timestamp_secs()
            .init();
        Ok(())
    }

    /// Options for `project_dir`: the `-c` file if given, else the project's
    /// `package.json` if it has one, else the defaults.
    pub fn load_options(&self, project_dir: &Path) -> Result<ResolvedOptions> {
        let raw = match &self.config_path {
            Some(path) => options::load(path)?,
            None => {
                let package_json = project_dir.join("package.json");
                if package_json.is_file() {
                    options::load(&package_json.to_string_lossy())?
                } else {
                    Options::default()
                }
            }
        };
        let base_path = project_dir.canonicalize()?;
        raw.resolve(&base_path.to_string_lossy(), &RendererRegistry::with_builtins())
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.start_time.elapsed().as_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition_is_valid() {
        CssmcCli::new().build_cli().debug_assert();
    }

    #[test]
    fn test_parses_build_arguments() {
        let matches = CssmcCli::new()
            .build_cli()
            .try_get_matches_from(["cssmc", "-vv", "build", "app", "-o", "out", "--no-cache"])
            .unwrap();
        assert_eq!(matches.get_count("verbose"), 2);
        let (name, build) = matches.subcommand().unwrap();
        assert_eq!(name, "build");
        assert_eq!(build.get_one::<String>("project").unwrap(), "app");
        assert_eq!(build.get_one::<String>("output").unwrap(), "out");
        assert_eq!(build.get_one::<String>("arch").unwrap(), DEFAULT_ARCH);
        assert!(build.get_flag("no-cache"));
    }

    #[test]
    fn test_load_options_from_package_json() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("package.json"),
            r#"{ "name": "app", "cssModules": { "jsClassNamingConvention": { "camelCase": true } } }"#,
        )
        .unwrap();

        let options = CssmcCli::new().load_options(temp_dir.path()).unwrap();
        assert!(options.raw.js_class_naming_convention.camel_case);
    }

    #[test]
    fn test_load_options_defaults_without_config() {
        let temp_dir = TempDir::new().unwrap();
        let options = CssmcCli::new().load_options(temp_dir.path()).unwrap();
        assert_eq!(options.raw, Options::default());
    }
}
