// FILE: src/cli/handlers.rs
use super::{CssmcCli, DEFAULT_CACHE_DIR, DEFAULT_OUT_DIR};
use crate::cache::BuildCache;
use crate::error::{CompilerError, Result};
use crate::host::DiskInputFile;
use crate::options::ResolvedOptions;
use crate::plugin::{BuildReport, CssModulesBuildPlugin};
use crate::utils;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::time::Instant;
use walkdir::WalkDir;

// --- BUILD ---
pub fn handle_build_command(cli: &CssmcCli, matches: &clap::ArgMatches) -> Result<()> {
    let project_dir = project_dir(matches)?;
    let out_dir = output_dir(&project_dir, matches)?;
    let arch = arch(matches);

    let cache = if matches.get_flag("no-cache") {
        BuildCache::in_memory()
    } else {
        BuildCache::persistent(project_dir.join(DEFAULT_CACHE_DIR))?
    };
    let mut plugin = CssModulesBuildPlugin::new(cli.load_options(&project_dir)?).with_cache(cache);

    println!("🔨 Building {} -> {}", project_dir.display(), out_dir.display());
    let report = build_once(&mut plugin, &project_dir, Some(&out_dir), &arch)?;
    print_report(&report, cli.elapsed_ms());

    if report.is_success() {
        Ok(())
    } else {
        Err(CompilerError::BuildFailed { failed: report.failed })
    }
}

// --- CHECK ---
pub fn handle_check_command(cli: &CssmcCli, matches: &clap::ArgMatches) -> Result<()> {
    let project_dir = project_dir(matches)?;
    let arch = arch(matches);
    let mut plugin = CssModulesBuildPlugin::new(cli.load_options(&project_dir)?);

    println!("🔍 Checking {}", project_dir.display());
    let report = build_once(&mut plugin, &project_dir, None, &arch)?;

    for failure in &report.failures {
        println!("❌ {} - {}", failure.source_path, failure.message);
    }
    print_report(&report, cli.elapsed_ms());

    if report.is_success() {
        println!("✅ No issues found");
        Ok(())
    } else {
        Err(CompilerError::BuildFailed { failed: report.failed })
    }
}

// --- WATCH ---
pub fn handle_watch_command(cli: &CssmcCli, matches: &clap::ArgMatches) -> Result<()> {
    let project_dir = project_dir(matches)?;
    let out_dir = output_dir(&project_dir, matches)?;
    let cache_dir = project_dir.join(DEFAULT_CACHE_DIR);
    let arch = arch(matches);

    let cache = BuildCache::persistent(&cache_dir)?;
    let mut plugin = CssModulesBuildPlugin::new(cli.load_options(&project_dir)?).with_cache(cache);

    println!("👀 Watching {} for changes...", project_dir.display());

    let (tx, rx) = channel();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                if let Err(e) = tx.send(event) {
                    eprintln!("Watch error: {}", e);
                }
            }
        },
        notify::Config::default(),
    )
    .map_err(|e| {
        CompilerError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Failed to create file watcher: {}", e),
        ))
    })?;

    watcher
        .watch(&project_dir, RecursiveMode::Recursive)
        .map_err(|e| {
            CompilerError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to watch directory: {}", e),
            ))
        })?;

    match build_once(&mut plugin, &project_dir, Some(&out_dir), &arch) {
        Ok(report) => print_report(&report, cli.elapsed_ms()),
        Err(e) => eprintln!("❌ Initial build failed: {}", e),
    }

    loop {
        match rx.recv() {
            Ok(event) => {
                let relevant = event
                    .paths
                    .iter()
                    .any(|path| !path.starts_with(&out_dir) && !path.starts_with(&cache_dir));
                if !relevant {
                    continue;
                }

                println!("🔄 Change detected, rebuilding...");
                match cli.load_options(&project_dir) {
                    Ok(options) => plugin.reload_options(options),
                    Err(e) => {
                        eprintln!("❌ Unable to reload options: {}", e);
                        continue;
                    }
                }

                let started = Instant::now();
                match build_once(&mut plugin, &project_dir, Some(&out_dir), &arch) {
                    Ok(report) => print_report(&report, started.elapsed().as_millis()),
                    Err(e) => eprintln!("❌ Build failed: {}", e),
                }
            }
            Err(e) => {
                eprintln!("Watch error: {}", e);
                break;
            }
        }
    }

    Ok(())
}

fn project_dir(matches: &clap::ArgMatches) -> Result<PathBuf> {
    let project = matches.get_one::<String>("project").map_or(".", String::as_str);
    let path = Path::new(project);
    if !path.is_dir() {
        return Err(CompilerError::FileNotFound {
            path: format!("Project directory {}", project),
        });
    }
    Ok(path.canonicalize()?)
}

fn output_dir(project_dir: &Path, matches: &clap::ArgMatches) -> Result<PathBuf> {
    let output = matches.get_one::<String>("output").map(String::as_str);
    resolve_output_dir(output, project_dir, &std::env::current_dir()?)
}

/// Absolute, symlink-free output directory, created if missing. A relative
/// `-o` is taken from `cwd`, the default lives inside the project. Scans and
/// the watcher compare it against canonical paths.
pub fn resolve_output_dir(output: Option<&str>, project_dir: &Path, cwd: &Path) -> Result<PathBuf> {
    let out_dir = match output {
        Some(output) => cwd.join(output),
        None => project_dir.join(DEFAULT_OUT_DIR),
    };
    fs::create_dir_all(&out_dir)?;
    Ok(out_dir.canonicalize()?)
}

fn arch(matches: &clap::ArgMatches) -> String {
    matches
        .get_one::<String>("arch")
        .cloned()
        .unwrap_or_else(|| super::DEFAULT_ARCH.to_string())
}

/// Scan, build and optionally write the artifacts.
fn build_once(
    plugin: &mut CssModulesBuildPlugin,
    project_dir: &Path,
    out_dir: Option<&Path>,
    arch: &str,
) -> Result<BuildReport> {
    let mut files = scan_project(project_dir, plugin.options(), arch, out_dir)?;
    log::info!("Found {} stylesheets in {}", files.len(), project_dir.display());

    let report = plugin.process_files_for_target(&mut files)?;

    if let Some(out_dir) = out_dir {
        let written = write_artifacts(&files, &plugin.options().base_path, out_dir)?;
        log::info!("Wrote {} artifacts to {}", written, out_dir.display());
    }
    Ok(report)
}

/// Every file below `project_dir` with a handled extension. Hidden folders and
/// the output folder are not descended into.
pub fn scan_project(
    project_dir: &Path,
    options: &ResolvedOptions,
    arch: &str,
    out_dir: Option<&Path>,
) -> Result<Vec<DiskInputFile>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(project_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            let is_output = out_dir.map_or(false, |out| entry.path().starts_with(out));
            !hidden && !is_output
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            CompilerError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Directory traversal error: {}", e),
            ))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(project_dir) else {
            continue;
        };
        let path_in_package = utils::normalize_slashes(&relative.to_string_lossy());
        if !options.handles_extension(&path_in_package) {
            continue;
        }
        files.push(DiskInputFile::load(project_dir, &path_in_package, arch)?);
    }

    Ok(files)
}

/// Write every emitted stylesheet (plus its source map) and module below
/// `out_dir`, mirroring the artifact paths.
pub fn write_artifacts(files: &[DiskInputFile], base_path: &str, out_dir: &Path) -> Result<usize> {
    let mut written = 0;
    for file in files {
        for stylesheet in &file.stylesheets {
            let target = out_dir.join(artifact_relative_path(&stylesheet.path, base_path));
            write_file(&target, &stylesheet.data)?;
            written += 1;
            if let Some(source_map) = &stylesheet.source_map {
                let mut map_path = target.into_os_string();
                map_path.push(".map");
                write_file(Path::new(&map_path), source_map)?;
            }
        }
        for javascript in &file.javascripts {
            let target = out_dir.join(artifact_relative_path(&javascript.path, base_path));
            write_file(&target, &javascript.data)?;
            written += 1;
        }
    }
    Ok(written)
}

fn artifact_relative_path(path: &str, base_path: &str) -> String {
    let path = utils::normalize_slashes(path);
    let path = path.strip_prefix(base_path).unwrap_or(&path);
    path.trim_start_matches("./").trim_start_matches('/').to_string()
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}

fn print_report(report: &BuildReport, elapsed_ms: u128) {
    println!("\n📊 Build Summary:");
    println!("   Compiled: {}", report.compiled);
    println!("   From cache: {}", report.cached);
    println!("   Skipped: {}", report.skipped);
    println!("   Failed: {}", report.failed);
    println!("   Time: {}ms", elapsed_ms);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use crate::renderer::RendererRegistry;
    use tempfile::TempDir;

    fn project(files: &[(&str, &str)]) -> (TempDir, PathBuf, ResolvedOptions) {
        let temp_dir = TempDir::new().unwrap();
        for (name, contents) in files {
            let path = temp_dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }
        let root = temp_dir.path().canonicalize().unwrap();
        let options = Options::default()
            .resolve(&root.to_string_lossy(), &RendererRegistry::with_builtins())
            .unwrap();
        (temp_dir, root, options)
    }

    #[test]
    fn test_scan_skips_hidden_and_unhandled_files() {
        let (_temp_dir, root, options) = project(&[
            ("client/a.css", ".a {}"),
            ("client/b.js", "export {}"),
            (".cssmc/out/client/a.css.css", ".x {}"),
            ("node_modules/lib/c.css", ".c {}"),
        ]);

        let files = scan_project(&root, &options, "web.browser", None).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path_in_package.as_str()).collect();
        assert_eq!(paths, vec!["client/a.css", "node_modules/lib/c.css"]);
    }

    #[test]
    fn test_build_writes_artifacts() {
        let (_temp_dir, root, options) = project(&[("client/a.css", ".a { color: red; }")]);
        let out_dir = root.join("out");
        let mut plugin = CssModulesBuildPlugin::new(options);

        let report = build_once(&mut plugin, &root, Some(&out_dir), "web.browser").unwrap();
        assert_eq!(report.compiled, 1);

        let css = fs::read_to_string(out_dir.join("client/a.css.css")).unwrap();
        assert!(css.contains("._client__a__a"));
        assert!(out_dir.join("client/a.css.css.map").is_file());
        let js = fs::read_to_string(out_dir.join("client/a.css.js")).unwrap();
        assert!(js.contains("export { styles as default, styles };"));
    }

    #[test]
    fn test_relative_output_dir_is_not_rescanned() {
        let (_temp_dir, root, options) = project(&[("client/a.css", ".a { color: red; }")]);
        let out_dir = resolve_output_dir(Some("out"), &root, &root).unwrap();
        assert_eq!(out_dir, root.join("out"));
        let mut plugin = CssModulesBuildPlugin::new(options);

        for _ in 0..2 {
            let report = build_once(&mut plugin, &root, Some(&out_dir), "web.browser").unwrap();
            assert!(report.is_success());
        }

        let files = scan_project(&root, plugin.options(), "web.browser", Some(&out_dir)).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path_in_package.as_str()).collect();
        assert_eq!(paths, vec!["client/a.css"]);
        assert!(out_dir.join("client/a.css.css").is_file());
        assert!(!out_dir.join("out").exists());
    }

    #[test]
    fn test_default_output_dir_lives_in_project() {
        let (_temp_dir, root, _options) = project(&[]);
        let out_dir = resolve_output_dir(None, &root, Path::new("/")).unwrap();
        assert_eq!(out_dir, root.join(DEFAULT_OUT_DIR));
        assert!(out_dir.is_dir());
    }

    #[test]
    fn test_artifact_relative_path() {
        assert_eq!(artifact_relative_path("./a.css.css", "/app"), "a.css.css");
        assert_eq!(artifact_relative_path("/app/lib/x.css.js", "/app"), "lib/x.css.js");
        assert_eq!(artifact_relative_path("client/a.css.js", "/app"), "client/a.css.js");
    }
}
