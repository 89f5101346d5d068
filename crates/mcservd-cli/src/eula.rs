//! EULA acceptance writer.

use std::fs;
use std::path::Path;

use anyhow::Context;

const EULA_FILE: &str = "eula.txt";

/// Write `eula=true` into the world's `eula.txt`, updating the key in place
/// and keeping any comment lines the server wrote.
pub fn accept_eula(world: &Path) -> anyhow::Result<()> {
    let path = world.join(EULA_FILE);
    let existing = if path.exists() {
        fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?
    } else {
        String::new()
    };

    let mut lines: Vec<String> = existing.lines().map(str::to_string).collect();
    let mut updated = false;
    for line in &mut lines {
        if line.trim_start().starts_with("eula=") {
            *line = "eula=true".to_string();
            updated = true;
        }
    }
    if !updated {
        lines.push("eula=true".to_string());
    }

    let mut out = lines.join("\n");
    out.push('\n');
    fs::write(&path, out).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_the_file_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        accept_eula(dir.path()).unwrap();
        let text = fs::read_to_string(dir.path().join(EULA_FILE)).unwrap();
        assert_eq!(text, "eula=true\n");
    }

    #[test]
    fn flips_false_to_true_and_keeps_comments() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(EULA_FILE),
            "#By changing the setting below to TRUE you agree to our EULA.\neula=false\n",
        )
        .unwrap();

        accept_eula(dir.path()).unwrap();
        let text = fs::read_to_string(dir.path().join(EULA_FILE)).unwrap();
        assert_eq!(
            text,
            "#By changing the setting below to TRUE you agree to our EULA.\neula=true\n"
        );
    }
}
