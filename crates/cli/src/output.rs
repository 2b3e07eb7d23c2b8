//! Human-readable report rendering.

use kmodharness::RunReport;
use kmodharness::observer::ObservationResult;
use kmodharness::registry::ModuleEntry;

pub fn print_human(report: &RunReport) {
    let module = report.module.as_deref().unwrap_or("<unknown>");
    println!(
        "\x1b[1m[*] Module\x1b[0m {module} \x1b[2m(backend: {})\x1b[0m",
        report.backend
    );
    print_observation("load marker", report.load_observation.as_ref());
    print_observation("unload marker", report.unload_observation.as_ref());
    if let Some(entry) = &report.entry {
        if let Some(taint) = entry.taint.as_deref().filter(|t| !t.is_empty()) {
            println!("    \x1b[1;33mtaint\x1b[0m         ({taint})");
        }
    }

    match &report.verdict.failure {
        None => println!("\x1b[1;32m[PASS]\x1b[0m {module}"),
        Some(failure) => {
            eprintln!(
                "\x1b[1;31m[FAIL]\x1b[0m {module}: \x1b[1m{}\x1b[0m during {}",
                failure.kind, failure.step
            );
            eprintln!("    {}", failure.message);
            if let Some(diagnostic) = &failure.diagnostic {
                eprintln!("    \x1b[2mdiagnostic:\x1b[0m {diagnostic}");
            }
            if let Some(cleanup) = &failure.cleanup {
                eprintln!("    \x1b[2mcleanup:\x1b[0m {cleanup}");
            }
        }
    }
}

fn print_observation(label: &str, observation: Option<&ObservationResult>) {
    let Some(obs) = observation else {
        return;
    };
    if obs.found {
        println!(
            "    {label:<13} seen after {:.3}s: {}",
            obs.elapsed.as_secs_f64(),
            obs.matched_line.as_deref().unwrap_or_default()
        );
    } else {
        println!(
            "    {label:<13} \x1b[1;33mnot seen\x1b[0m within {:.3}s",
            obs.elapsed.as_secs_f64()
        );
    }
}

pub fn print_modules<'a>(modules: impl Iterator<Item = &'a ModuleEntry>) {
    println!("{:<24} {:>10} {:>5}  {:<10} DEPS", "MODULE", "SIZE", "REFS", "TAINT");
    for m in modules {
        let deps = if m.dependencies.is_empty() {
            "-".to_string()
        } else {
            m.dependencies.join(",")
        };
        println!(
            "{:<24} {:>10} {:>5}  {:<10} {}",
            m.name,
            m.size,
            m.refcount,
            m.taint.as_deref().unwrap_or("-"),
            deps
        );
    }
}
