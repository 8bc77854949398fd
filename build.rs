use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Source trees the hygiene scans cover. Target output and any reference
/// material next to the package are left alone.
const SCANNED_DIRS: [&str; 3] = ["stats", "tests", "benches"];

const FORBIDDEN_WORDS: [&str; 14] = [
    "FIXED",
    "CORRECTED",
    "FIX",
    "FIXES",
    "NEW",
    "CHANGED",
    "CHANGES",
    "CHANGE",
    "MODIFIED",
    "MODIFIES",
    "MODIFY",
    "UPDATED",
    "UPDATES",
    "UPDATE",
];

/// One hygiene rule: the line regex that selects candidates, and the
/// explanation printed when a file violates it.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Check {
    UnderscorePrefix,
    ForbiddenWords,
    StarsInComments,
    AllCapsComment,
    AllowDeadCode,
}

impl Check {
    const ALL: [Check; 5] = [
        Check::UnderscorePrefix,
        Check::ForbiddenWords,
        Check::StarsInComments,
        Check::AllCapsComment,
        Check::AllowDeadCode,
    ];

    fn pattern(self) -> String {
        match self {
            Check::UnderscorePrefix => r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            Check::ForbiddenWords => format!(r"(//|/\*|///).*(?:{})", FORBIDDEN_WORDS.join("|")),
            Check::StarsInComments => r"(//|/\*).*\*\*".to_string(),
            Check::AllCapsComment => r"(//|/\*|///).*".to_string(),
            Check::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Check::UnderscorePrefix => {
                "underscore-prefixed variables.\n\n⚠️ Either use the variable (removing the underscore) or remove it completely."
            }
            Check::ForbiddenWords => {
                "forbidden comment patterns.\n\n⚠️ Comments naming a fix, change, modification or update (in capitals) are not allowed. Remove them completely."
            }
            Check::StarsInComments => {
                "'**' patterns in regular comments.\n\n⚠️ '**' is only allowed in doc comments."
            }
            Check::AllCapsComment => {
                "comments with all uppercase alphabetic characters.\n\n⚠️ Strongly consider deleting the comment completely."
            }
            Check::AllowDeadCode => {
                "#[allow(dead_code)] attributes.\n\n⚠️ Either use the code (removing the attribute) or remove it completely."
            }
        }
    }

    /// Whether a line the regex matched really violates this rule.
    fn violated_by(self, line: &str) -> bool {
        let trimmed = line.trim_start();
        match self {
            Check::UnderscorePrefix => {
                let is_comment = trimmed.starts_with("//") || line.contains("/*");
                // Odd-numbered segments between quotes are string contents.
                let in_string = line
                    .split('"')
                    .enumerate()
                    .any(|(i, part)| i % 2 == 1 && part.contains('_'));
                !(is_comment || in_string)
            }
            Check::ForbiddenWords | Check::AllowDeadCode => true,
            Check::StarsInComments => !trimmed.starts_with("///"),
            Check::AllCapsComment => {
                let comment = if let Some(rest) = trimmed.strip_prefix("///") {
                    rest
                } else if let Some(rest) = trimmed.strip_prefix("//") {
                    rest
                } else if let Some(idx) = line.find("/*") {
                    let rest = &line[idx + 2..];
                    rest.find("*/").map_or(rest, |end| &rest[..end])
                } else {
                    return false;
                };
                let mut letters = comment.chars().filter(|c| c.is_alphabetic()).peekable();
                letters.peek().is_some() && letters.all(char::is_uppercase)
            }
        }
    }
}

/// Collects every violating line of one file.
struct Violations {
    check: Check,
    lines: Vec<String>,
}

impl Sink for Violations {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.check.violated_by(line_text) {
            self.lines.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SCANNED_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    let files = source_files();
    for check in Check::ALL {
        if let Err(e) = scan(check, &files) {
            // The `eprintln!` is what surfaces the report in cargo's output.
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

fn source_files() -> Vec<PathBuf> {
    SCANNED_DIRS
        .iter()
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn scan(check: Check, files: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(&check.pattern())?;
    let mut searcher = Searcher::new();
    for path in files {
        let mut violations = Violations {
            check,
            lines: Vec::new(),
        };
        searcher.search_path(&matcher, path, &mut violations)?;
        if !violations.lines.is_empty() {
            return Err(report(check, path, &violations.lines).into());
        }
    }
    Ok(())
}

fn report(check: Check, path: &Path, lines: &[String]) -> String {
    let mut message = format!(
        "\n❌ ERROR: Found {} {}\n   in {}:\n",
        lines.len(),
        check.describe(),
        path.display()
    );
    for line in lines {
        message.push_str(&format!("   {line}\n"));
    }
    message
}
