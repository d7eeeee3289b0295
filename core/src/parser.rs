// Block parser.
//
// Turns Python source into a deterministic sequence of non-overlapping
// `Block`s, each checksummed over its canonicalized text. Uses
// `rustpython_parser`'s `Ranged` trait for start/end positions, which needs
// the 0.4 line rather than 0.3 (0.3 only exposes a row for a definition's
// first line, with no end position, so bodies can't be hashed in full and
// nested defs can't be excluded from their enclosing scope's range).

use crc32fast::Hasher;
use rustpython_parser::ast::{self, Ranged};
use rustpython_parser::Parse;
use std::path::Path;

use crate::types::{Block, BlockKind};

/// Parse Python source into blocks. Never fails: a syntactically invalid
/// file yields one degenerate block spanning the whole file, checksummed
/// over its raw bytes -- any edit to an unparseable file then invalidates
/// every dependent test, which is the point.
pub fn parse_source(source: &str) -> Vec<Block> {
    match ast::Suite::parse(source, "<module>") {
        Ok(suite) => {
            let mut blocks = Vec::new();
            extract_module_blocks(&suite, source, &mut blocks);
            extract_definitions(&suite, source, &mut blocks, None);
            blocks
        }
        Err(err) => {
            tracing::warn!(error = %err, "source failed to parse, falling back to degenerate block");
            vec![degenerate_block(source)]
        }
    }
}

pub fn parse_file(path: &Path) -> std::io::Result<Vec<Block>> {
    let source = std::fs::read_to_string(path)?;
    Ok(parse_source(&source))
}

fn degenerate_block(source: &str) -> Block {
    let line_count = source.lines().count().max(1);
    Block {
        kind: BlockKind::Module,
        name: "<unparseable>".to_string(),
        start_line: 1,
        end_line: line_count,
        checksum: checksum_raw(source.as_bytes()),
    }
}

/// Every top-level statement that is not itself a def/class -- imports and
/// bare statements alike -- collapsed into one or more contiguous `Module`
/// blocks. Consecutive statements (gap <= 2 lines) merge into one block, so
/// a file with defs interleaved with plain top-level code doesn't produce
/// overlapping ranges between this pass and `extract_definitions`.
fn extract_module_blocks(stmts: &[ast::Stmt], source: &str, blocks: &mut Vec<Block>) {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for stmt in stmts {
        if matches!(
            stmt,
            ast::Stmt::FunctionDef(_) | ast::Stmt::AsyncFunctionDef(_) | ast::Stmt::ClassDef(_)
        ) {
            continue;
        }
        let start = offset_to_line(source, stmt.range().start().into());
        let end = offset_to_line(source, stmt.range().end().into());
        ranges.push((start, end));
    }

    if ranges.is_empty() {
        return;
    }

    let mut current_start = ranges[0].0;
    let mut current_end = ranges[0].1;
    let mut index = 0;

    let mut push_block = |start: usize, end: usize, idx: usize, blocks: &mut Vec<Block>| {
        let text = extract_lines(source, start, end);
        blocks.push(Block {
            kind: BlockKind::Module,
            name: format!("<module_{}>", idx),
            start_line: start,
            end_line: end,
            checksum: checksum_canonical(&text),
        });
    };

    for &(start, end) in &ranges[1..] {
        if start <= current_end + 2 {
            current_end = current_end.max(end);
        } else {
            push_block(current_start, current_end, index, blocks);
            index += 1;
            current_start = start;
            current_end = end;
        }
    }
    push_block(current_start, current_end, index, blocks);
}

/// Recursively extract function/async-function/class blocks. A class's
/// block covers only its header, up to (not including) its first method;
/// a function's block covers its entire range including decorators, but
/// nested function bodies are pulled out as their own blocks first, and
/// their line ranges are cut out of the enclosing definition's checksummed
/// text (see `nested_def_ranges`/`push_function_block`) so editing a nested
/// def's body never changes the enclosing block's checksum.
///
/// A grandchild def doesn't need its own exclusion here: it's nested inside
/// a direct child's contiguous range, so cutting the direct child's whole
/// range out of the enclosing text already removes every line below it too.
fn extract_definitions(
    stmts: &[ast::Stmt],
    source: &str,
    blocks: &mut Vec<Block>,
    parent_class: Option<&str>,
) {
    for stmt in stmts {
        match stmt {
            ast::Stmt::FunctionDef(func) => {
                let start = match func.decorator_list.first() {
                    Some(d) => offset_to_line(source, d.range().start().into()),
                    None => offset_to_line(source, func.range.start().into()),
                };
                let end = offset_to_line(source, func.range.end().into());
                let excludes = nested_def_ranges(&func.body, source);
                push_function_block(
                    start,
                    end,
                    &excludes,
                    &func.name,
                    BlockKind::Function,
                    parent_class,
                    source,
                    blocks,
                );
                extract_definitions(&func.body, source, blocks, None);
            }
            ast::Stmt::AsyncFunctionDef(func) => {
                let start = match func.decorator_list.first() {
                    Some(d) => offset_to_line(source, d.range().start().into()),
                    None => offset_to_line(source, func.range.start().into()),
                };
                let end = offset_to_line(source, func.range.end().into());
                let excludes = nested_def_ranges(&func.body, source);
                push_function_block(
                    start,
                    end,
                    &excludes,
                    &func.name,
                    BlockKind::AsyncFunction,
                    parent_class,
                    source,
                    blocks,
                );
                extract_definitions(&func.body, source, blocks, None);
            }
            ast::Stmt::ClassDef(class) => {
                let start = offset_to_line(source, class.range.start().into());
                let full_end = offset_to_line(source, class.range.end().into());

                let header_end = class
                    .body
                    .iter()
                    .filter_map(|s| {
                        matches!(s, ast::Stmt::FunctionDef(_) | ast::Stmt::AsyncFunctionDef(_))
                            .then(|| offset_to_line(source, s.range().start().into()) - 1)
                    })
                    .min()
                    .unwrap_or(full_end);

                let text = extract_lines(source, start, header_end);
                blocks.push(Block {
                    kind: BlockKind::Class,
                    name: class.name.to_string(),
                    start_line: start,
                    end_line: header_end,
                    checksum: checksum_canonical(&text),
                });

                extract_definitions(&class.body, source, blocks, Some(&class.name));
            }
            _ => {}
        }
    }
}

/// Direct function/async-function/class children of `body`, as the line
/// ranges to cut out of a parent block's checksummed text. Only immediate
/// children are collected -- see `extract_definitions`'s doc comment for
/// why that's sufficient.
fn nested_def_ranges(body: &[ast::Stmt], source: &str) -> Vec<(usize, usize)> {
    body.iter()
        .filter_map(|stmt| match stmt {
            ast::Stmt::FunctionDef(func) => {
                let start = match func.decorator_list.first() {
                    Some(d) => offset_to_line(source, d.range().start().into()),
                    None => offset_to_line(source, func.range.start().into()),
                };
                Some((start, offset_to_line(source, func.range.end().into())))
            }
            ast::Stmt::AsyncFunctionDef(func) => {
                let start = match func.decorator_list.first() {
                    Some(d) => offset_to_line(source, d.range().start().into()),
                    None => offset_to_line(source, func.range.start().into()),
                };
                Some((start, offset_to_line(source, func.range.end().into())))
            }
            ast::Stmt::ClassDef(class) => Some((
                offset_to_line(source, class.range.start().into()),
                offset_to_line(source, class.range.end().into()),
            )),
            _ => None,
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn push_function_block(
    start: usize,
    end: usize,
    excludes: &[(usize, usize)],
    name: &str,
    kind: BlockKind,
    parent_class: Option<&str>,
    source: &str,
    blocks: &mut Vec<Block>,
) {
    let text = extract_lines_excluding(source, start, end, excludes);

    let qualified_name = match parent_class {
        Some(class) => format!("{}.{}", class, name),
        None => name.to_string(),
    };

    blocks.push(Block {
        kind,
        name: qualified_name,
        start_line: start,
        end_line: end,
        checksum: checksum_canonical(&text),
    });
}

/// Canonicalize then checksum: strip per-line whitespace, drop blank
/// lines, drop `#` line comments. Python has no delimited block-comment
/// syntax, so line-comment stripping is the whole of it; docstring-style
/// leading string-literal statements are genuinely executed (they're
/// `Expr` statements, not declarations) and so are kept like any other
/// line.
fn canonicalize(source: &str) -> String {
    source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n")
}

fn checksum_canonical(source: &str) -> String {
    checksum_raw(canonicalize(source).as_bytes())
}

fn checksum_raw(bytes: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    format!("{:08x}", hasher.finalize())
}

fn extract_lines(source: &str, start: usize, end: usize) -> String {
    extract_lines_excluding(source, start, end, &[])
}

/// Same as `extract_lines`, but lines falling inside any of `excludes`
/// (each an inclusive 1-indexed `(start, end)`) are dropped -- this is what
/// keeps a nested def's body out of its enclosing block's checksum.
fn extract_lines_excluding(
    source: &str,
    start: usize,
    end: usize,
    excludes: &[(usize, usize)],
) -> String {
    source
        .lines()
        .enumerate()
        .filter(|(i, _)| *i + 1 >= start && *i < end)
        .filter(|(i, _)| {
            let line = *i + 1;
            !excludes
                .iter()
                .any(|&(ex_start, ex_end)| line >= ex_start && line <= ex_end)
        })
        .map(|(_, line)| line)
        .collect::<Vec<_>>()
        .join("\n")
}

fn offset_to_line(source: &str, offset: usize) -> usize {
    source[..offset.min(source.len())]
        .chars()
        .filter(|&c| c == '\n')
        .count()
        + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_prelude_and_function_are_separate_blocks() {
        let blocks = parse_source("import os\n\ndef foo():\n    return os.getcwd()\n");
        assert!(blocks.iter().any(|b| b.kind == BlockKind::Module));
        assert!(blocks.iter().any(|b| b.name == "foo"));
    }

    #[test]
    fn nested_function_is_its_own_block_and_excluded_from_outer() {
        let source = "def outer():\n    def inner():\n        return 1\n    return inner\n";
        let blocks = parse_source(source);
        let outer = blocks.iter().find(|b| b.name == "outer").unwrap();
        let inner = blocks.iter().find(|b| b.name == "inner").unwrap();
        assert!(inner.start_line > outer.start_line);
        assert_ne!(outer.checksum, inner.checksum);
    }

    #[test]
    fn editing_nested_function_body_leaves_outer_checksum_unchanged() {
        let before = "def outer():\n    def inner():\n        return 1\n    return inner\n";
        let after = "def outer():\n    def inner():\n        return 2\n    return inner\n";

        let outer_before = parse_source(before)
            .into_iter()
            .find(|b| b.name == "outer")
            .unwrap();
        let outer_after = parse_source(after)
            .into_iter()
            .find(|b| b.name == "outer")
            .unwrap();

        assert_eq!(outer_before.checksum, outer_after.checksum);
    }

    #[test]
    fn outer_checksum_excludes_nested_def_even_with_code_after_it() {
        let source = "def outer():\n    a = 1\n    def inner():\n        return 1\n    b = 2\n    return a, b, inner\n";
        let blocks = parse_source(source);
        let outer = blocks.iter().find(|b| b.name == "outer").unwrap();

        let edited = "def outer():\n    a = 1\n    def inner():\n        return 999\n    b = 2\n    return a, b, inner\n";
        let outer_edited = parse_source(edited)
            .into_iter()
            .find(|b| b.name == "outer")
            .unwrap();

        assert_eq!(outer.checksum, outer_edited.checksum);
    }

    #[test]
    fn class_header_excludes_methods() {
        let source = "class Calc:\n    \"\"\"doc\"\"\"\n    def add(self, a, b):\n        return a + b\n";
        let blocks = parse_source(source);
        let class = blocks.iter().find(|b| b.name == "Calc").unwrap();
        let method = blocks.iter().find(|b| b.name == "Calc.add").unwrap();
        assert!(class.end_line < method.start_line);
    }

    #[test]
    fn checksum_is_stable_across_invocations() {
        let source = "def f():\n    return 1\n";
        assert_eq!(
            parse_source(source)[1].checksum,
            parse_source(source)[1].checksum
        );
    }

    #[test]
    fn checksum_ignores_whitespace_and_comments() {
        let a = checksum_canonical("def foo():\n    return 1");
        let b = checksum_canonical("def foo():\n        return 1  # comment\n\n");
        assert_eq!(a, b);
    }

    #[test]
    fn checksum_detects_real_changes() {
        let a = checksum_canonical("def foo():\n    return 1");
        let b = checksum_canonical("def foo():\n    return 2");
        assert_ne!(a, b);
    }

    #[test]
    fn unparseable_file_yields_one_degenerate_block() {
        let blocks = parse_source("def foo(:\n    pass\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].name, "<unparseable>");
    }

    #[test]
    fn async_function_is_tagged_correctly() {
        let blocks = parse_source("async def fetch():\n    return 1\n");
        let f = blocks.iter().find(|b| b.name == "fetch").unwrap();
        assert_eq!(f.kind, BlockKind::AsyncFunction);
    }
}
