use centurion_agent::{Message as LlmMessage, Role};
use centurion_core::config::MAX_MEDIA_OUTBOUND_ITEMS;
use centurion_core::types::Direction;
use centurion_store::models::Message as StoredMessage;
use serde::Deserialize;

/// One media attachment lifted out of an assistant response's `media` block
///. `asset_id` names something the channel-specific sender already
/// knows how to resolve; this pipeline never fetches the bytes itself.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaPlanItem {
    pub asset_id: String,
    #[serde(rename = "type")]
    pub media_type: String,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedResponse {
    pub text: String,
    pub media: Vec<MediaPlanItem>,
}

const MEDIA_FENCE_OPEN: &str = "```media";
const MEDIA_FENCE_CLOSE: &str = "```";
const ALLOWED_MEDIA_TYPES: [&str; 4] = ["audio", "image", "video", "document"];

/// Builds the system prompt: base persona plus optional long-term-memory and
/// knowledge-base sections.
pub fn build_system_prompt(persona_prompt: &str, memory_bullets: &[String], knowledge_snippets: &[(String, String)]) -> String {
    let mut out = persona_prompt.to_string();

    if !memory_bullets.is_empty() {
        out.push_str("\n\n<memoria_long_term>\n");
        for bullet in memory_bullets.iter().take(10) {
            out.push_str("- ");
            out.push_str(bullet);
            out.push('\n');
        }
        out.push_str("</memoria_long_term>");
    }

    if !knowledge_snippets.is_empty() {
        out.push_str("\n\n<knowledge_base>\n");
        for (title, snippet) in knowledge_snippets.iter().take(8) {
            out.push_str(&format!("## {title}\n{snippet}\n\n"));
        }
        out.push_str("</knowledge_base>");
    }

    out
}

/// Maps stored history into chat roles, dropping the trailing `pending_count`
/// inbound turns so the consolidated pending text isn't sent twice
/// (`TrimPending`).
pub fn trim_pending(history: &[StoredMessage], pending_count: usize) -> Vec<LlmMessage> {
    let mut to_drop = pending_count;
    let mut out = Vec::with_capacity(history.len());
    for msg in history.iter().rev() {
        if to_drop > 0 && msg.direction == Direction::Inbound {
            to_drop -= 1;
            continue;
        }
        out.push(msg);
    }
    out.reverse();
    out.into_iter()
        .map(|m| LlmMessage {
            role: match m.direction {
                Direction::Inbound => Role::User,
                Direction::Outbound => Role::Assistant,
            },
            content: m.effective_text(),
        })
        .collect()
}

/// Extracts and removes a fenced ```media block (object or array of
/// `{asset_id, type, caption?}`) from assistant text. Unknown media
/// types are dropped; at most `MAX_MEDIA_OUTBOUND_ITEMS` entries are kept.
pub fn parse_response(raw: &str) -> ParsedResponse {
    let Some(start) = raw.find(MEDIA_FENCE_OPEN) else {
        return ParsedResponse { text: raw.trim().to_string(), media: Vec::new() };
    };
    let body_start = start + MEDIA_FENCE_OPEN.len();
    let Some(close_rel) = raw[body_start..].find(MEDIA_FENCE_CLOSE) else {
        return ParsedResponse { text: raw.trim().to_string(), media: Vec::new() };
    };
    let body_end = body_start + close_rel;
    let block_body = raw[body_start..body_end].trim();
    let after = body_end + MEDIA_FENCE_CLOSE.len();

    let mut cleaned = String::with_capacity(raw.len());
    cleaned.push_str(&raw[..start]);
    cleaned.push_str(&raw[after..]);

    let parsed: Option<serde_json::Value> = serde_json::from_str(block_body).ok();
    let items: Vec<MediaPlanItem> = match parsed {
        Some(serde_json::Value::Array(arr)) => arr
            .into_iter()
            .filter_map(|v| serde_json::from_value::<MediaPlanItem>(v).ok())
            .collect(),
        Some(v @ serde_json::Value::Object(_)) => serde_json::from_value::<MediaPlanItem>(v).into_iter().collect(),
        _ => Vec::new(),
    };

    let media = items
        .into_iter()
        .filter(|m| ALLOWED_MEDIA_TYPES.contains(&m.media_type.as_str()))
        .take(MAX_MEDIA_OUTBOUND_ITEMS)
        .collect();

    ParsedResponse { text: cleaned.trim().to_string(), media }
}

/// Splits cleaned assistant text into outbound chunks: a no-op when
/// chunking is disabled or the text already fits; otherwise greedily packs
/// sentences (split on `.!?`) up to `max_chars`, hard-splitting any single
/// sentence that alone exceeds the limit.
pub fn chunk_text(text: &str, max_chars: usize, chunking_enabled: bool) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if !chunking_enabled || max_chars == 0 || text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let sentences = split_sentences(text);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in sentences {
        for piece in hard_split(&sentence, max_chars) {
            if current.is_empty() {
                current = piece;
                continue;
            }
            let candidate_len = current.chars().count() + 1 + piece.chars().count();
            if candidate_len <= max_chars {
                current.push(' ');
                current.push_str(&piece);
            } else {
                chunks.push(std::mem::take(&mut current));
                current = piece;
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            sentences.push(std::mem::take(&mut current).trim().to_string());
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences.into_iter().filter(|s| !s.is_empty()).collect()
}

fn hard_split(sentence: &str, max_chars: usize) -> Vec<String> {
    if sentence.chars().count() <= max_chars {
        return vec![sentence.to_string()];
    }
    sentence
        .chars()
        .collect::<Vec<char>>()
        .chunks(max_chars)
        .map(|c| c.iter().collect::<String>())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_response_extracts_media_array_and_strips_fence() {
        let raw = "Claro! Seguem as fotos.\n```media\n[{\"asset_id\":\"a1\",\"type\":\"image\"},{\"asset_id\":\"a2\",\"type\":\"bogus\"}]\n```\nAte mais.";
        let parsed = parse_response(raw);
        assert_eq!(parsed.media.len(), 1);
        assert_eq!(parsed.media[0].asset_id, "a1");
        assert!(!parsed.text.contains("```"));
        assert!(parsed.text.contains("Claro"));
        assert!(parsed.text.contains("Ate mais"));
    }

    #[test]
    fn parse_response_without_fence_is_passthrough() {
        let parsed = parse_response("so texto aqui");
        assert_eq!(parsed.text, "so texto aqui");
        assert!(parsed.media.is_empty());
    }

    #[test]
    fn chunk_text_noop_when_disabled_or_short() {
        assert_eq!(chunk_text("oi", 1200, true), vec!["oi".to_string()]);
        assert_eq!(chunk_text("a".repeat(2000).as_str(), 1200, false), vec!["a".repeat(2000)]);
    }

    #[test]
    fn chunk_text_packs_sentences_under_limit() {
        let text = "Primeira frase curta. Segunda frase tambem curta. Terceira.";
        let chunks = chunk_text(text, 30, true);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 30, "chunk too long: {c:?}");
        }
    }

    #[test]
    fn chunk_text_hard_splits_oversized_sentence() {
        let long_sentence = "x".repeat(50);
        let chunks = chunk_text(&long_sentence, 20, true);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 20));
    }
}
