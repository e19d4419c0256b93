use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::chunking::languages::TSLanguageParsing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Function,
    Class,
    Interface,
    TypeAlias,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Imports,
    Calls,
    Extends,
    Instantiates,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub kind: RelationKind,
    pub from: String,
    pub to: String,
}

static IMPORT_PATTERNS: Lazy<Vec<(Regex, usize)>> = Lazy::new(|| {
    vec![
        (Regex::new(r#"^\s*import\s+.*?from\s+['"]([^'"]+)['"]"#).unwrap(), 1),
        (Regex::new(r#"^\s*import\s+['"]([^'"]+)['"]"#).unwrap(), 1),
        (Regex::new(r#"^\s*(?:from\s+(\S+)\s+)?import\s+(\S+)"#).unwrap(), 1),
        (Regex::new(r#"^\s*use\s+([a-zA-Z0-9_:]+)"#).unwrap(), 1),
    ]
});

static CLASS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:class|interface)\s+(\w+)(?:\s+extends\s+(\w+))?(?:\s+implements\s+(\w+))?"#).unwrap()
});

static TYPE_ALIAS_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r#"type\s+(\w+)\s*="#).unwrap());

static INSTANTIATION_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r#"new\s+(\w+)\s*\("#).unwrap());

static CALL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\b([A-Za-z_][A-Za-z0-9_]*)\s*\("#).unwrap());

/// Extracts entities `{function, class, interface, type_alias}` and
/// relations `{imports, calls, extends, instantiates}` from one file
/// (spec §6). Function entities come from the teacher's tree-sitter
/// `function_query`; everything else (class/interface/type-alias
/// declarations, import lines, `new X(...)` instantiation, bare calls) is
/// recovered with lightweight source-level patterns rather than a second
/// per-language tree-sitter query set, since the parser layer's own
/// grammars do not expose those constructs uniformly across the three
/// supported languages.
pub fn extract_entities_and_relations(
    parser: &TSLanguageParsing,
    relative_path: &str,
    source: &str,
) -> (Vec<Entity>, Vec<Relation>) {
    let mut entities = Vec::new();
    let mut relations = Vec::new();

    let extension = std::path::Path::new(relative_path)
        .extension()
        .and_then(|e| e.to_str());

    if let Some(config) = extension.and_then(|ext| parser.for_file_extension(ext)) {
        entities.extend(extract_functions(parser, config, source));
    }

    for (line_no, line) in source.lines().enumerate() {
        if let Some((name, extends)) = CLASS_PATTERN.captures(line).map(|c| {
            (
                c.get(1).unwrap().as_str().to_string(),
                c.get(2).map(|m| m.as_str().to_string()),
            )
        }) {
            let kind = if line.trim_start().starts_with("interface") {
                EntityKind::Interface
            } else {
                EntityKind::Class
            };
            entities.push(Entity {
                kind,
                name: name.clone(),
                start_line: line_no,
                end_line: line_no,
            });
            if let Some(parent) = extends {
                relations.push(Relation {
                    kind: RelationKind::Extends,
                    from: name,
                    to: parent,
                });
            }
        }

        if let Some(c) = TYPE_ALIAS_PATTERN.captures(line) {
            entities.push(Entity {
                kind: EntityKind::TypeAlias,
                name: c.get(1).unwrap().as_str().to_string(),
                start_line: line_no,
                end_line: line_no,
            });
        }

        for (pattern, group) in IMPORT_PATTERNS.iter() {
            if let Some(c) = pattern.captures(line) {
                if let Some(m) = c.get(*group) {
                    relations.push(Relation {
                        kind: RelationKind::Imports,
                        from: relative_path.to_string(),
                        to: m.as_str().to_string(),
                    });
                }
            }
        }

        for c in INSTANTIATION_PATTERN.captures_iter(line) {
            relations.push(Relation {
                kind: RelationKind::Instantiates,
                from: relative_path.to_string(),
                to: c.get(1).unwrap().as_str().to_string(),
            });
        }

        for c in CALL_PATTERN.captures_iter(line) {
            let name = c.get(1).unwrap().as_str();
            if matches!(name, "if" | "for" | "while" | "match" | "switch" | "function" | "new") {
                continue;
            }
            relations.push(Relation {
                kind: RelationKind::Calls,
                from: relative_path.to_string(),
                to: name.to_string(),
            });
        }
    }

    (entities, relations)
}

fn extract_functions(
    _parser: &TSLanguageParsing,
    config: &crate::chunking::languages::TSLanguageConfig,
    source: &str,
) -> Vec<Entity> {
    let grammar = config.grammar;
    let mut ts_parser = tree_sitter::Parser::new();
    if ts_parser.set_language(grammar()).is_err() {
        return Vec::new();
    }
    let Some(tree) = ts_parser.parse(source.as_bytes(), None) else {
        return Vec::new();
    };
    let root = tree.root_node();

    let mut entities = Vec::new();
    for query_src in &config.function_query {
        let Ok(query) = tree_sitter::Query::new(grammar(), query_src) else {
            continue;
        };
        let mut cursor = tree_sitter::QueryCursor::new();
        for (query_match, _) in cursor.captures(&query, root, source.as_bytes()) {
            for capture in query_match.captures {
                let capture_name = query.capture_names()[capture.index as usize].as_str();
                if capture_name != "function" {
                    continue;
                }
                let node = capture.node;
                let name = node
                    .child_by_field_name("name")
                    .map(|n| n.utf8_text(source.as_bytes()).unwrap_or_default().to_string())
                    .unwrap_or_else(|| "<anonymous>".to_string());
                entities.push(Entity {
                    kind: EntityKind::Function,
                    name,
                    start_line: node.start_position().row,
                    end_line: node.end_position().row,
                });
            }
        }
    }
    entities
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_function_entity_in_rust_source() {
        let parser = TSLanguageParsing::init();
        let source = "fn greet(name: &str) {\n    println!(\"hi {}\", name);\n}\n";
        let (entities, _) = extract_entities_and_relations(&parser, "src/lib.rs", source);
        assert!(entities.iter().any(|e| e.kind == EntityKind::Function && e.name == "greet"));
    }

    #[test]
    fn finds_import_and_extends_relation_in_typescript() {
        let parser = TSLanguageParsing::init();
        let source = "import { Base } from './base';\nclass Widget extends Base {}\n";
        let (entities, relations) = extract_entities_and_relations(&parser, "src/widget.ts", source);
        assert!(entities.iter().any(|e| e.name == "Widget" && e.kind == EntityKind::Class));
        assert!(relations
            .iter()
            .any(|r| r.kind == RelationKind::Imports && r.to == "./base"));
        assert!(relations
            .iter()
            .any(|r| r.kind == RelationKind::Extends && r.from == "Widget" && r.to == "Base"));
    }
}
