use std::convert::Infallible;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a guest language is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageKind {
    /// Evaluated in an isolated worker process
    Scripting,
    /// Rendered inside a sandboxed frame, no value comes back
    Markup,
    /// Delegated to an external interpreter through the runtime bridge
    ExternalInterpreted,
    /// No strategy; execution yields the "unsupported" result
    Unsupported,
}

impl fmt::Display for LanguageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Scripting => "scripting",
            Self::Markup => "markup",
            Self::ExternalInterpreted => "external",
            Self::Unsupported => "unsupported",
        };
        f.write_str(name)
    }
}

/// A language the playground knows by name.
///
/// Parsing never fails: unknown ids are kept as `Other` and classified as
/// unsupported unless a runtime is configured for them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GuestLanguage {
    #[default]
    JavaScript,
    TypeScript,
    Html,
    Python,
    Ruby,
    Php,
    Shell,
    Lua,
    Perl,
    Java,
    CSharp,
    Cpp,
    Go,
    Rust,
    Sql,
    Css,
    Json,
    Markdown,
    Hcl,
    Bicep,
    PowerShell,
    Other(String),
}

struct LanguageInfo {
    language: GuestLanguage,
    id: &'static str,
    label: &'static str,
    aliases: &'static [&'static str],
    extensions: &'static [&'static str],
}

const fn info(
    language: GuestLanguage,
    id: &'static str,
    label: &'static str,
    aliases: &'static [&'static str],
    extensions: &'static [&'static str],
) -> LanguageInfo {
    LanguageInfo {
        language,
        id,
        label,
        aliases,
        extensions,
    }
}

const LANGUAGES: &[LanguageInfo] = &[
    info(GuestLanguage::JavaScript, "javascript", "JavaScript", &["js"], &["js", "jsx", "mjs"]),
    info(GuestLanguage::TypeScript, "typescript", "TypeScript", &["ts"], &["ts", "tsx"]),
    info(GuestLanguage::Html, "html", "HTML", &["htm"], &["html", "htm"]),
    info(GuestLanguage::Python, "python", "Python", &["py", "python3"], &["py"]),
    info(GuestLanguage::Ruby, "ruby", "Ruby", &["rb"], &["rb"]),
    info(GuestLanguage::Php, "php", "PHP", &[], &["php"]),
    info(GuestLanguage::Shell, "shell", "Bash/Shell", &["bash", "sh", "zsh"], &["sh", "bash"]),
    info(GuestLanguage::Lua, "lua", "Lua", &[], &["lua"]),
    info(GuestLanguage::Perl, "perl", "Perl", &["pl"], &["pl"]),
    info(GuestLanguage::Java, "java", "Java", &[], &["java"]),
    info(GuestLanguage::CSharp, "csharp", "C#", &["cs", "c#"], &["cs"]),
    info(GuestLanguage::Cpp, "cpp", "C++", &["c++"], &["cpp", "cc", "hpp"]),
    info(GuestLanguage::Go, "go", "Go", &["golang"], &["go"]),
    info(GuestLanguage::Rust, "rust", "Rust", &["rs"], &["rs"]),
    info(GuestLanguage::Sql, "sql", "SQL", &[], &["sql"]),
    info(GuestLanguage::Css, "css", "CSS", &[], &["css"]),
    info(GuestLanguage::Json, "json", "JSON", &[], &["json"]),
    info(GuestLanguage::Markdown, "markdown", "Markdown", &["md"], &["md"]),
    info(GuestLanguage::Hcl, "hcl", "Terraform", &["terraform", "tf"], &["tf"]),
    info(GuestLanguage::Bicep, "bicep", "Bicep", &[], &["bicep"]),
    info(GuestLanguage::PowerShell, "powershell", "PowerShell", &["ps1", "pwsh"], &["ps1"]),
];

impl GuestLanguage {
    /// Resolve a language id or alias, case-insensitively.
    pub fn parse(name: &str) -> Self {
        let normalized = name.trim().to_lowercase();
        LANGUAGES
            .iter()
            .find(|entry| entry.id == normalized || entry.aliases.contains(&normalized.as_str()))
            .map(|entry| entry.language.clone())
            .unwrap_or(Self::Other(normalized))
    }

    /// Detect the language of a source file from its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_lowercase();
        LANGUAGES
            .iter()
            .find(|entry| entry.extensions.contains(&extension.as_str()))
            .map(|entry| entry.language.clone())
    }

    /// Every named language, in display order.
    pub fn all() -> impl Iterator<Item = GuestLanguage> {
        LANGUAGES.iter().map(|entry| entry.language.clone())
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Other(name) => name.as_str(),
            known => info_for(known).map(|entry| entry.id).unwrap_or_default(),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Other(name) => name.as_str(),
            known => info_for(known).map(|entry| entry.label).unwrap_or_default(),
        }
    }

    /// Built-in classification, before any configured runtime is considered.
    pub fn kind(&self) -> LanguageKind {
        match self {
            Self::JavaScript | Self::TypeScript => LanguageKind::Scripting,
            Self::Html => LanguageKind::Markup,
            Self::Python | Self::Ruby | Self::Php | Self::Shell | Self::Lua | Self::Perl => {
                LanguageKind::ExternalInterpreted
            }
            _ => LanguageKind::Unsupported,
        }
    }
}

fn info_for(language: &GuestLanguage) -> Option<&'static LanguageInfo> {
    LANGUAGES.iter().find(|entry| &entry.language == language)
}

impl fmt::Display for GuestLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for GuestLanguage {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<String> for GuestLanguage {
    fn from(name: String) -> Self {
        Self::parse(&name)
    }
}

impl From<&str> for GuestLanguage {
    fn from(name: &str) -> Self {
        Self::parse(name)
    }
}

impl From<GuestLanguage> for String {
    fn from(language: GuestLanguage) -> Self {
        language.id().to_string()
    }
}
