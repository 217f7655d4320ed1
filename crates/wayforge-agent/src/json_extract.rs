//! Pull a JSON object out of an oracle text response that may wrap it in
//! a fenced code block or surround it with prose.

pub fn extract_json_block(content: &str) -> String {
    let content = content.trim();

    if let Some(start) = content.find("```json") {
        let json_start = start + 7;
        if let Some(end) = content[json_start..].find("```") {
            return content[json_start..json_start + end].trim().to_string();
        }
    }

    if let Some(start) = content.find("```") {
        let block_start = start + 3;
        let actual_start = content[block_start..].find('\n').map(|n| block_start + n + 1).unwrap_or(block_start);
        if let Some(end) = content[actual_start..].find("```") {
            return content[actual_start..actual_start + end].trim().to_string();
        }
    }

    if let (Some(start), Some(end)) = (content.find('{'), content.rfind('}')) {
        if start < end {
            return content[start..=end].to_string();
        }
    }

    content.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_from_json_fence() {
        let content = "Here you go:\n```json\n{\"a\": 1}\n```\nThanks";
        assert_eq!(extract_json_block(content), "{\"a\": 1}");
    }

    #[test]
    fn extracts_from_bare_fence() {
        let content = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json_block(content), "{\"a\": 1}");
    }

    #[test]
    fn extracts_from_bare_braces_with_surrounding_prose() {
        let content = "sure, here's the object {\"a\": 1} hope that helps";
        assert_eq!(extract_json_block(content), "{\"a\": 1}");
    }
}
