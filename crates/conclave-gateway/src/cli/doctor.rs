use conclave_domain::config::{Config, ConfigSeverity};
use conclave_providers::ProviderRegistry;

/// Run all diagnostic checks and print a summary.
///
/// Returns `true` when every check passes.
pub fn run(config: &Config, config_path: &str) -> bool {
    println!("conclave doctor");
    println!("===============\n");

    let mut all_passed = true;

    check_config_file(config_path, &mut all_passed);
    check_config_validation(config, &mut all_passed);
    check_providers(config, &mut all_passed);
    check_store(config, &mut all_passed);

    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }

    all_passed
}

fn check_config_file(config_path: &str, all_passed: &mut bool) {
    let exists = std::path::Path::new(config_path).exists();
    print_check(
        "Config file exists",
        exists,
        if exists {
            config_path.to_owned()
        } else {
            format!("{config_path} not found (using defaults)")
        },
    );
    if !exists {
        *all_passed = false;
    }
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();

    if issues.is_empty() {
        print_check("Config validation", true, "no issues".into());
    } else {
        print_check(
            "Config validation",
            error_count == 0,
            format!("{} issue(s) ({error_count} error(s))", issues.len()),
        );
        for issue in &issues {
            println!("      {issue}");
        }
        if error_count > 0 {
            *all_passed = false;
        }
    }
}

fn check_providers(config: &Config, all_passed: &mut bool) {
    match ProviderRegistry::from_configs(&config.providers) {
        Ok(registry) => {
            print_check(
                "Provider registry builds",
                true,
                format!("{} adapter(s) registered", registry.len()),
            );
        }
        Err(err) => {
            print_check("Provider registry builds", false, err.to_string());
            *all_passed = false;
        }
    }
}

fn check_store(config: &Config, all_passed: &mut bool) {
    let dsn = &config.server.store_dsn;
    let ok = dsn == "memory";
    print_check(
        "Conversation store reachable",
        ok,
        if ok {
            "memory (bundled backend)".to_string()
        } else {
            format!("{dsn} (no backend registered for this DSN)")
        },
    );
    if !ok {
        *all_passed = false;
    }
}

fn print_check(name: &str, passed: bool, detail: String) {
    let status = if passed { "PASS" } else { "FAIL" };
    println!("  [{status}] {name}: {detail}");
}
