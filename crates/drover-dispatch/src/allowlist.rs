use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

const JOBSCHEDULER_SERVICE: &str = "android/com.android.server.update.SystemUpdateService";
const ALLOWED_PROPS: [&str; 2] = [
    "ro.build.version.release",
    "ro.build.version.security_patch",
];

fn allow_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // specific flags only, no free-form arguments
            r"^am\s+start\s+(-[nWDR]\s+[A-Za-z0-9._/:]+\s*)+$",
            r"^am\s+force-stop\s+[A-Za-z0-9._]+$",
            r"^cmd\s+package\s+(list|resolve-activity)\s+[A-Za-z0-9._\s-]*$",
            r"^settings\s+(get|put)\s+(secure|system|global)\s+[A-Za-z0-9._]+(\s+[A-Za-z0-9._]+)?$",
            // numbers only for input commands
            r"^input\s+(keyevent|tap|swipe)\s+[0-9\s]+$",
            r"^svc\s+(wifi|data)\s+(enable|disable)$",
            r"^pm\s+list\s+packages(\s+-[a-z]+)*$",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static allow-list pattern"))
        .collect()
    })
}

fn disable_user_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^pm\s+disable-user\s+--user\s+0\s+([A-Za-z0-9_]+(?:\.[A-Za-z0-9_]+)+)$")
            .expect("static pattern")
    })
}

fn package_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_]+(?:\.[A-Za-z0-9_]+)+$").expect("static pattern")
    })
}

/// Validate a shell payload against the allow-list, supporting `&&` chaining.
///
/// `enabled_bloatware` is the preloaded set of packages an operator has
/// marked disable-able; `agent_package` owns the only writable temp dir the
/// batch script may use.
pub fn validate_shell_command(
    command: &str,
    enabled_bloatware: &HashSet<String>,
    agent_package: &str,
) -> Result<(), String> {
    let command = command.trim();
    if command.is_empty() {
        return Err("command is empty".into());
    }

    // The batch bloatware script is the one permitted heredoc; detect it
    // before the generic metacharacter checks would reject it.
    let looks_like_batch = command.contains("cat >")
        && command.contains("<< 'EOF'")
        && command.contains("pm disable-user")
        && (command.contains("done <") || command.contains("while"));
    if looks_like_batch {
        return validate_batch_bloatware_script(command, enabled_bloatware, agent_package);
    }

    // Block | ; > < ` $ and newlines; single & (backgrounding) is also
    // rejected, only && chaining passes.
    const DANGEROUS: [char; 8] = ['|', ';', '>', '<', '`', '$', '\n', '\r'];
    if command.chars().any(|c| DANGEROUS.contains(&c)) {
        return Err("dangerous shell metacharacters not allowed".into());
    }
    if command.contains('&') && !command.contains("&&") {
        return Err("single & not allowed (only && for chaining)".into());
    }

    if command.contains("&&") {
        for (i, sub) in command.split("&&").enumerate() {
            validate_single_command(sub.trim(), enabled_bloatware)
                .map_err(|e| format!("subcommand {} failed validation: {e}", i + 1))?;
        }
        return Ok(());
    }

    validate_single_command(command, enabled_bloatware)
}

/// Validate one command with no `&&` chaining.
fn validate_single_command(
    cmd: &str,
    enabled_bloatware: &HashSet<String>,
) -> Result<(), String> {
    if cmd.is_empty() {
        return Err("command is empty".into());
    }
    let tokens: Vec<&str> = cmd.split_whitespace().collect();
    if tokens.is_empty() {
        return Err("command is empty".into());
    }

    // cmd jobscheduler run [-f] <service> <numeric job id>
    if tokens.len() >= 4 && tokens[0] == "cmd" && tokens[1] == "jobscheduler" && tokens[2] == "run"
    {
        let mut remaining = &tokens[3..];
        if remaining.first() == Some(&"-f") {
            remaining = &remaining[1..];
        }
        if remaining.len() < 2 {
            return Err("invalid jobscheduler command format".into());
        }
        if remaining.len() > 2 {
            return Err("unexpected arguments in jobscheduler command".into());
        }
        if remaining[0] != JOBSCHEDULER_SERVICE {
            return Err("only SystemUpdateService is allowed for jobscheduler".into());
        }
        if !remaining[1].chars().all(|c| c.is_ascii_digit()) || remaining[1].is_empty() {
            return Err("job ID must be numeric".into());
        }
        return Ok(());
    }

    // getprop of a fixed property set
    if tokens.len() == 2 && tokens[0] == "getprop" {
        if ALLOWED_PROPS.contains(&tokens[1]) {
            return Ok(());
        }
        return Err(format!(
            "only {} are allowed for getprop",
            ALLOWED_PROPS.join(", ")
        ));
    }

    // pm disable-user gated on the managed bloatware registry
    if let Some(caps) = disable_user_re().captures(cmd) {
        let package = &caps[1];
        if enabled_bloatware.contains(package) {
            return Ok(());
        }
        return Err(format!("package {package} is not in the enabled bloatware list"));
    }

    for pattern in allow_patterns() {
        if pattern.is_match(cmd) {
            return Ok(());
        }
    }

    Err("command not in allow-list; only safe, pre-approved commands are permitted".into())
}

// ── Batch bloatware script ────────────────────────────────────────────────────

/// Render the canonical batch-disable script for a package list.
///
/// The list travels in a quoted heredoc and the loop reads it back from a
/// temp file, so the command-line length stays bounded and already-disabled
/// packages are skipped rather than failing the batch.
pub fn build_batch_bloatware_script(packages: &[String], agent_package: &str) -> String {
    format!(
        r#"TMP_DIR="/data/data/{agent_package}/files"
LIST_FILE="$TMP_DIR/bloat_list.txt"
mkdir -p "$TMP_DIR"
cat > "$LIST_FILE" << 'EOF'
{package_list}
EOF
count=0; failed=0
while IFS= read -r pkg; do
  [ -z "$pkg" ] && continue
  if pm disable-user --user 0 "$pkg" 2>/dev/null; then
    count=$((count+1))
  else
    failed=$((failed+1))
  fi
done < "$LIST_FILE"
rm -f "$LIST_FILE"
echo "Disabled $count packages ($failed skipped or failed)""#,
        package_list = packages.join("\n"),
    )
}

/// Structural validation of the batch script plus per-package gating.
fn validate_batch_bloatware_script(
    command: &str,
    enabled_bloatware: &HashSet<String>,
    agent_package: &str,
) -> Result<(), String> {
    let required = [
        "mkdir -p",
        "cat >",
        "<< 'EOF'",
        "while IFS= read -r pkg",
        "pm disable-user --user 0",
        "done <",
        "rm -f",
    ];
    for part in required {
        if !command.contains(part) {
            return Err(format!("invalid batch script: missing required component '{part}'"));
        }
    }

    // TMP_DIR must be one of the allowed locations.
    let agent_files_dir = format!("/data/data/{agent_package}/files");
    let tmp_dir_re = Regex::new(r#"TMP_DIR=(["']?)(.*?)\1"#).expect("static pattern");
    match tmp_dir_re.captures(command) {
        Some(caps) => {
            let tmp_dir = &caps[2];
            if tmp_dir != "/data/local/tmp" && tmp_dir != agent_files_dir {
                return Err(format!("TMP_DIR ('{tmp_dir}') is not in an allowed directory"));
            }
        }
        None => {
            if !command.contains(&agent_files_dir) {
                return Err(format!("script must use the {agent_files_dir} directory"));
            }
        }
    }

    // Consistent variable usage throughout the script.
    let expected = [
        r#"mkdir -p ["']?\$TMP_DIR["']?"#,
        r#"cat > ["']?\$LIST_FILE["']?"#,
        r#"done < ["']?\$LIST_FILE["']?"#,
        r#"rm -f ["']?\$LIST_FILE["']?"#,
    ];
    for pattern in expected {
        let re = Regex::new(pattern).expect("static pattern");
        if !re.is_match(command) {
            return Err(format!(
                "script validation failed: inconsistent variable usage or missing pattern '{pattern}'"
            ));
        }
    }

    let pm_re = Regex::new(r#"pm disable-user --user 0 ["']?\$pkg["']? 2>/dev/null"#)
        .expect("static pattern");
    if !pm_re.is_match(command) {
        return Err("script does not use the expected 'pm disable-user' command".into());
    }

    // Extract and gate the heredoc package list.
    let heredoc_re = Regex::new(r"(?s)<< 'EOF'\n(.*?)\nEOF").expect("static pattern");
    let body = heredoc_re
        .captures(command)
        .map(|c| c[1].to_string())
        .ok_or_else(|| "invalid script format: could not find package list in heredoc".to_string())?;

    let packages: Vec<&str> = body.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if packages.is_empty() {
        return Err("no packages found in script".into());
    }

    for package in packages {
        if !package_name_re().is_match(package) {
            return Err(format!("invalid package name format: {package}"));
        }
        if !enabled_bloatware.contains(package) {
            return Err(format!("package '{package}' is not in the enabled bloatware list"));
        }
    }

    Ok(())
}
