//! File language detection by extension.

/// Language assigned when the extension is missing or unknown.
pub const DEFAULT_LANGUAGE: &str = "Text";

/// Whole-filename matches checked before the extension table.
const FILENAMES: &[(&str, &str)] = &[
    ("Dockerfile", "Dockerfile"),
    ("Makefile", "Makefile"),
    ("CMakeLists.txt", "CMake"),
    ("Gemfile", "Ruby"),
    ("Rakefile", "Ruby"),
    ("Cargo.lock", "TOML"),
];

const EXTENSIONS: &[(&str, &str)] = &[
    ("rs", "Rust"),
    ("py", "Python"),
    ("pyw", "Python"),
    ("rb", "Ruby"),
    ("js", "JavaScript"),
    ("mjs", "JavaScript"),
    ("cjs", "JavaScript"),
    ("jsx", "JavaScript"),
    ("ts", "TypeScript"),
    ("tsx", "TypeScript"),
    ("go", "Go"),
    ("java", "Java"),
    ("kt", "Kotlin"),
    ("kts", "Kotlin"),
    ("swift", "Swift"),
    ("c", "C"),
    ("h", "C"),
    ("cc", "C++"),
    ("cpp", "C++"),
    ("cxx", "C++"),
    ("hpp", "C++"),
    ("cs", "C#"),
    ("php", "PHP"),
    ("pl", "Perl"),
    ("lua", "Lua"),
    ("r", "R"),
    ("scala", "Scala"),
    ("hs", "Haskell"),
    ("ex", "Elixir"),
    ("exs", "Elixir"),
    ("erl", "Erlang"),
    ("clj", "Clojure"),
    ("dart", "Dart"),
    ("sh", "Shell"),
    ("bash", "Shell"),
    ("zsh", "Shell"),
    ("ps1", "PowerShell"),
    ("sql", "SQL"),
    ("html", "HTML"),
    ("htm", "HTML"),
    ("css", "CSS"),
    ("scss", "SCSS"),
    ("json", "JSON"),
    ("yaml", "YAML"),
    ("yml", "YAML"),
    ("toml", "TOML"),
    ("xml", "XML"),
    ("md", "Markdown"),
    ("markdown", "Markdown"),
    ("ini", "INI"),
    ("vim", "Vim Script"),
    ("diff", "Diff"),
    ("patch", "Diff"),
    ("tf", "HCL"),
    ("txt", "Text"),
];

/// Returns the display language for a filename, or `"Text"`.
pub fn detect_language(filename: &str) -> &'static str {
    let name = filename.rsplit('/').next().unwrap_or(filename);

    if let Some((_, language)) = FILENAMES.iter().find(|(f, _)| *f == name) {
        return language;
    }

    let extension = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => return DEFAULT_LANGUAGE,
    };

    EXTENSIONS
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, language)| *language)
        .unwrap_or(DEFAULT_LANGUAGE)
}
