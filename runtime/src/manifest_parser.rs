//! Script header parser.
//!
//! Scripts carry their manifest as YAML inside a comment block delimited
//! by `---` lines, near the top of the file:
//!
//! ```text
//! #!/usr/bin/env python3
//! # ---
//! # name: Resizer
//! # description: Resize images to a fixed size.
//! # input-types: "Images (*.png *.jpg)"
//! # entry-points:
//! #   single: main
//! #   batch: process_files
//! # parameters: []
//! # ---
//! ```
//!
//! Only the header is read; the script body is never executed to obtain
//! metadata.

use crate::errors::RuntimeError;
use crate::manifest::RawManifest;

/// Comment prefixes recognised for the manifest block.
const COMMENT_PREFIXES: &[&str] = &["//", "#"];

/// Strip a comment prefix from a line, returning the prefix and the body
/// with at most one separating space removed.
fn split_comment(line: &str) -> Option<(&'static str, &str)> {
    let trimmed = line.trim_start();
    COMMENT_PREFIXES.iter().find_map(|prefix| {
        trimmed.strip_prefix(prefix).map(|rest| {
            let body = rest.strip_prefix(' ').unwrap_or(rest);
            (*prefix, body.trim_end_matches('\r'))
        })
    })
}

/// Extract the YAML text of the manifest block.
pub fn extract_manifest_block(content: &str) -> Result<String, RuntimeError> {
    let mut lines = content.lines().enumerate().peekable();

    // Shebang, blank lines and ordinary comments may precede the block.
    let prefix = loop {
        let Some((idx, line)) = lines.next() else {
            return Err(RuntimeError::InvalidPlugin(
                "missing manifest header (expected a `# ---` comment block)".to_string(),
            ));
        };
        if idx == 0 && line.starts_with("#!") {
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        match split_comment(line) {
            Some((prefix, body)) if body.trim() == "---" => break prefix,
            Some(_) => continue,
            None => {
                return Err(RuntimeError::InvalidPlugin(
                    "missing manifest header (expected a `# ---` comment block)".to_string(),
                ))
            }
        }
    };

    let mut yaml = String::new();
    for (_, line) in lines {
        if line.trim().is_empty() {
            yaml.push('\n');
            continue;
        }
        match split_comment(line) {
            Some((p, body)) if p == prefix => {
                if body.trim() == "---" {
                    return Ok(yaml);
                }
                yaml.push_str(body);
                yaml.push('\n');
            }
            _ => break,
        }
    }

    Err(RuntimeError::InvalidPlugin(
        "manifest header not properly closed (missing `---`)".to_string(),
    ))
}

/// Parse the manifest header of a script into its raw form.
pub fn parse_manifest_header(content: &str) -> Result<RawManifest, RuntimeError> {
    let yaml = extract_manifest_block(content)?;
    if yaml.trim().is_empty() {
        return Err(RuntimeError::InvalidPlugin("manifest header is empty".to_string()));
    }

    serde_yaml::from_str(&yaml)
        .map_err(|e| RuntimeError::InvalidPlugin(format!("invalid manifest YAML: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_python_header() {
        let content = r#"#!/usr/bin/env python3
# -*- coding: utf-8 -*-
# ---
# name: Resizer
# description: Resize images.
# input-types: "Images (*.png)"
# parameters:
#   - name: size
#     type: int
#     default: 800
# ---
import sys
"#;
        let raw = parse_manifest_header(content).unwrap();
        assert_eq!(raw.name.unwrap().as_str(), Some("Resizer"));
        let params = raw.parameters.unwrap();
        assert_eq!(params.as_sequence().map(|s| s.len()), Some(1));
    }

    #[test]
    fn test_parse_slash_comment_header() {
        let content = "// ---\n// name: Thing\n// description: d\n// ---\nconsole.log(1)\n";
        let raw = parse_manifest_header(content).unwrap();
        assert_eq!(raw.name.unwrap().as_str(), Some("Thing"));
    }

    #[test]
    fn test_indentation_is_preserved() {
        let content = "# ---\n# entry-points:\n#   single: main\n#   batch: run_all\n# ---\n";
        let yaml = extract_manifest_block(content).unwrap();
        assert!(yaml.contains("  single: main"));
    }

    #[test]
    fn test_missing_header() {
        let content = "import os\n# ---\n# name: late\n# ---\n";
        let err = parse_manifest_header(content).unwrap_err();
        assert!(err.to_string().contains("missing manifest header"));
    }

    #[test]
    fn test_unclosed_header() {
        let content = "# ---\n# name: broken\nprint('x')\n";
        let err = parse_manifest_header(content).unwrap_err();
        assert!(err.to_string().contains("not properly closed"));
    }

    #[test]
    fn test_mixed_prefix_does_not_close() {
        let content = "# ---\n# name: broken\n// ---\n";
        assert!(parse_manifest_header(content).is_err());
    }

    #[test]
    fn test_invalid_yaml() {
        let content = "# ---\n# name: [unclosed\n# ---\n";
        let err = parse_manifest_header(content).unwrap_err();
        assert!(err.to_string().contains("invalid manifest YAML"));
    }

    #[test]
    fn test_empty_header() {
        let content = "# ---\n# ---\n";
        assert!(parse_manifest_header(content).is_err());
    }
}
