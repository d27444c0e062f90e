#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DocBlock {
    /// 1-based line of the opening `/**`.
    pub line: usize,
    pub text: String,
}

pub(crate) fn extract_docblocks(source: &str) -> Vec<DocBlock> {
    let mut blocks = Vec::new();
    let mut rest = source;
    let mut line = 1;

    while let Some(start) = rest.find("/**") {
        line += rest[..start].matches('\n').count();
        let after = &rest[start + 3..];
        if !after.starts_with(char::is_whitespace) {
            // `/**/` and `/***` banners are not doc comments.
            rest = after;
            continue;
        }
        let Some(end) = after.find("*/") else {
            break;
        };
        let body = &after[..end];
        blocks.push(DocBlock {
            line,
            text: strip_gutter(body),
        });
        line += body.matches('\n').count();
        rest = &after[end + 2..];
    }

    blocks
}

fn strip_gutter(body: &str) -> String {
    body.split('\n')
        .map(|raw| {
            let trimmed = raw.trim_end_matches('\r').trim_start();
            match trimmed.strip_prefix('*') {
                Some(stripped) => stripped.strip_prefix(' ').unwrap_or(stripped),
                None => trimmed,
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    // Docblocks keep their line structure so annotation errors can point at the source line.
    fn extracts_blocks_with_line_numbers() {
        let source = "<?php\n\n/**\n * @SWG\\Get(path=\"/user\")\n */\nfunction a() {}\n/** one-liner */\n";
        let blocks = extract_docblocks(source);

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].line, 3);
        assert_eq!(blocks[0].text, "\n@SWG\\Get(path=\"/user\")\n");
        assert_eq!(blocks[1].line, 7);
        assert_eq!(blocks[1].text, "one-liner ");
    }

    #[test]
    fn ignores_plain_and_banner_comments() {
        let source = "/* plain */\n/**/\n/*** banner ***/\nint x;";
        assert!(extract_docblocks(source).is_empty());
    }

    #[test]
    // An unterminated docblock at the end of a file is dropped rather than read to EOF.
    fn skips_unterminated_block() {
        let source = "/** ok */\n/**\n * @OA\\Get(";
        let blocks = extract_docblocks(source);

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "ok ");
    }

    #[test]
    fn strips_crlf_and_gutters() {
        let source = "/**\r\n *   indented\r\n *no-space\r\n */";
        let blocks = extract_docblocks(source);

        assert_eq!(blocks[0].text, "\n  indented\nno-space\n");
    }
}
