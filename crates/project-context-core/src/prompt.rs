//! Prompt composition for project-aware answers.
//!
//! The system prompt is an ordered list of optional sections. Each
//! section is a pure function of [`PromptInputs`] returning its text or
//! `None`; the prompt is the present sections joined by blank lines.
//!
//! | Order | Section | Present when |
//! |-------|---------|--------------|
//! | 1 | [`persona_section`] | always |
//! | 2 | [`evidence_priority_section`] | always |
//! | 3 | [`project_details_section`] | context exists and score > `min_score` |
//! | 4 | [`closing_guidance_section`] | same as 3 |
//!
//! Retrieved evidence is never part of the system prompt; it is carried
//! in the user turn (see [`compose_user_turn`]) so it is always included,
//! whatever the relevance score.

use crate::models::{AnalyzerProjectContext, Pattern, ScoredRecord, Technology, TechnologyCategory};

/// Scores at or below this keep structured context out of the prompt.
pub const DEFAULT_MIN_RELEVANCE: u8 = 3;

/// Score assumed when the scorer's reply contains no usable integer.
pub const DEFAULT_RELEVANCE_SCORE: u8 = 5;

const EVIDENCE_OPEN: &str = "[Retrieved evidence]";
const EVIDENCE_CLOSE: &str = "[End of retrieved evidence]";

/// Everything the section functions depend on.
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    /// Name of the hosting application, mentioned in the persona.
    pub app_context: Option<&'a str>,
    pub relevance_score: u8,
    pub context: Option<&'a AnalyzerProjectContext>,
    pub min_score: u8,
}

impl<'a> PromptInputs<'a> {
    /// Whether structured project context is folded into the prompt.
    pub fn includes_project_details(&self) -> bool {
        self.context.is_some() && self.relevance_score > self.min_score
    }
}

type Section = fn(&PromptInputs<'_>) -> Option<String>;

const SECTIONS: &[Section] = &[
    persona_section,
    evidence_priority_section,
    project_details_section,
    closing_guidance_section,
];

/// Build the full system prompt from its sections.
pub fn compose_system_prompt(inputs: &PromptInputs<'_>) -> String {
    SECTIONS
        .iter()
        .filter_map(|section| section(inputs))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn persona_section(inputs: &PromptInputs<'_>) -> Option<String> {
    let mut text = String::from(
        "You are an expert software engineering assistant. You answer questions about the \
         user's codebase accurately and concisely, and you say so when you are unsure.",
    );
    if let Some(app) = inputs.app_context.map(str::trim).filter(|a| !a.is_empty()) {
        text.push_str(&format!(" You are running inside {}.", app));
    }
    Some(text)
}

pub fn evidence_priority_section(_inputs: &PromptInputs<'_>) -> Option<String> {
    Some(format!(
        "If the user's message contains a {} block, treat it as the most authoritative \
         source of information about the project and prioritize it over everything else, \
         including any general project details below.",
        EVIDENCE_OPEN
    ))
}

pub fn project_details_section(inputs: &PromptInputs<'_>) -> Option<String> {
    if !inputs.includes_project_details() {
        return None;
    }
    let ctx = inputs.context?;

    let mut out = String::from("## General project details");

    let (frameworks, technologies): (Vec<&Technology>, Vec<&Technology>) = ctx
        .technologies
        .iter()
        .partition(|t| t.category == TechnologyCategory::Framework);

    push_list(
        &mut out,
        "Technologies",
        technologies.iter().map(|t| technology_bullet(t)),
    );
    push_list(
        &mut out,
        "Frameworks",
        frameworks.iter().map(|t| technology_bullet(t)),
    );
    push_list(
        &mut out,
        "Architectural patterns",
        ctx.architectural_patterns.iter().map(pattern_bullet),
    );
    push_list(
        &mut out,
        "Code patterns",
        ctx.code_patterns.iter().map(pattern_bullet),
    );
    push_list(
        &mut out,
        "Coding conventions",
        ctx.coding_conventions.iter().map(pattern_bullet),
    );
    push_list(
        &mut out,
        "Best practices observed",
        ctx.best_practices_observed
            .iter()
            .map(|p| format!("- {}", one_line(p))),
    );

    let structure = ctx.file_structure_summary.trim();
    if !structure.is_empty() {
        out.push_str("\n\n### File structure\n");
        out.push_str(structure);
    }

    Some(out)
}

pub fn closing_guidance_section(inputs: &PromptInputs<'_>) -> Option<String> {
    if !inputs.includes_project_details() {
        return None;
    }
    Some(
        "When the retrieved evidence and the general project details disagree, prefer the \
         retrieved evidence. When sources of context conflict, state which source your answer \
         is based on. Match the style of any code examples to the project's detected \
         conventions."
            .to_string(),
    )
}

fn push_list<I>(out: &mut String, title: &str, bullets: I)
where
    I: Iterator<Item = String>,
{
    let bullets: Vec<String> = bullets.collect();
    if bullets.is_empty() {
        return;
    }
    out.push_str(&format!("\n\n### {}\n", title));
    out.push_str(&bullets.join("\n"));
}

fn technology_bullet(t: &Technology) -> String {
    let mut line = format!("- {}", t.name);
    if let Some(v) = t.version.as_deref().filter(|v| !v.is_empty()) {
        line.push_str(&format!(" ({})", v));
    }
    if let Some(d) = t.description.as_deref().filter(|d| !d.trim().is_empty()) {
        line.push_str(&format!(": {}", one_line(d)));
    }
    line
}

fn pattern_bullet(p: &Pattern) -> String {
    match p.description.as_deref().filter(|d| !d.trim().is_empty()) {
        Some(d) => format!("- {}: {}", p.name, one_line(d)),
        None => format!("- {}", p.name),
    }
}

/// First line of a description, trimmed.
fn one_line(text: &str) -> &str {
    text.trim().lines().next().unwrap_or("").trim()
}

/// Render retrieved chunks as the evidence block carried in the user turn.
///
/// Returns `None` when nothing was retrieved.
pub fn format_evidence(records: &[ScoredRecord]) -> Option<String> {
    if records.is_empty() {
        return None;
    }
    let mut out = String::from(EVIDENCE_OPEN);
    for hit in records {
        let r = &hit.record;
        out.push_str(&format!(
            "\n--- {} (lines {}-{}, similarity {:.2}) ---\n",
            r.file_path, r.start_line, r.end_line, hit.similarity
        ));
        out.push_str(r.chunk_text.trim_end());
    }
    out.push('\n');
    out.push_str(EVIDENCE_CLOSE);
    Some(out)
}

/// The final user turn: evidence block (if any) followed by the question.
pub fn compose_user_turn(message: &str, evidence: Option<&str>) -> String {
    match evidence {
        Some(block) => format!("{}\n\nQuestion:\n{}", block, message),
        None => message.to_string(),
    }
}

/// Compact plain-text summary of a project analysis, used for scoring.
pub fn context_summary(ctx: &AnalyzerProjectContext) -> String {
    fn names(items: &[Pattern]) -> String {
        items
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    let technologies = ctx
        .technologies
        .iter()
        .map(|t| t.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let mut lines = Vec::new();
    if !technologies.is_empty() {
        lines.push(format!("Technologies: {}", technologies));
    }
    if !ctx.architectural_patterns.is_empty() {
        lines.push(format!(
            "Architectural patterns: {}",
            names(&ctx.architectural_patterns)
        ));
    }
    if !ctx.code_patterns.is_empty() {
        lines.push(format!("Code patterns: {}", names(&ctx.code_patterns)));
    }
    if !ctx.coding_conventions.is_empty() {
        lines.push(format!("Conventions: {}", names(&ctx.coding_conventions)));
    }
    let structure = one_line(&ctx.file_structure_summary);
    if !structure.is_empty() {
        lines.push(format!("Structure: {}", structure));
    }
    if lines.is_empty() {
        lines.push("(no details detected)".to_string());
    }
    lines.join("\n")
}

/// System and user text for the relevance scoring request.
pub fn relevance_request(question: &str, ctx: &AnalyzerProjectContext) -> (String, String) {
    let system = "You rate how relevant a software project's description is to a user's \
                  question. Reply with a single integer from 0 (unrelated) to 10 (essential). \
                  Do not explain."
        .to_string();
    let user = format!(
        "Project description:\n{}\n\nQuestion:\n{}\n\nRelevance (0-10):",
        context_summary(ctx),
        question
    );
    (system, user)
}

/// Parse the first integer in `0..=10` from a scorer reply.
///
/// Digit runs outside the range are skipped. Returns
/// [`DEFAULT_RELEVANCE_SCORE`] when none is found.
pub fn parse_relevance_score(reply: &str) -> u8 {
    reply
        .split(|c: char| !c.is_ascii_digit())
        .filter(|run| !run.is_empty())
        .find_map(|run| run.parse::<u32>().ok().filter(|n| *n <= 10))
        .map(|n| n as u8)
        .unwrap_or(DEFAULT_RELEVANCE_SCORE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VectorRecord;

    fn sample_context() -> AnalyzerProjectContext {
        AnalyzerProjectContext {
            technologies: vec![
                Technology {
                    name: "TypeScript".to_string(),
                    category: TechnologyCategory::Language,
                    version: Some("5.3".to_string()),
                    description: Some("Typed JavaScript\nsecond line".to_string()),
                },
                Technology {
                    name: "React".to_string(),
                    category: TechnologyCategory::Framework,
                    version: None,
                    description: None,
                },
            ],
            architectural_patterns: vec![Pattern {
                name: "Component-based UI".to_string(),
                description: Some("Views are composed from small components".to_string()),
            }],
            code_patterns: vec![Pattern {
                name: "Custom hooks".to_string(),
                description: None,
            }],
            coding_conventions: vec![],
            file_structure_summary: "src/ with components/ and hooks/".to_string(),
            best_practices_observed: vec!["Strict type checking".to_string()],
            ..Default::default()
        }
    }

    fn inputs(score: u8, ctx: Option<&AnalyzerProjectContext>) -> PromptInputs<'_> {
        PromptInputs {
            app_context: Some("the Acme IDE"),
            relevance_score: score,
            context: ctx,
            min_score: DEFAULT_MIN_RELEVANCE,
        }
    }

    #[test]
    fn test_gate_boundary() {
        let ctx = sample_context();
        let at_three = compose_system_prompt(&inputs(3, Some(&ctx)));
        let at_four = compose_system_prompt(&inputs(4, Some(&ctx)));
        assert!(!at_three.contains("General project details"));
        assert!(at_four.contains("General project details"));
        assert!(at_four.contains("prefer the retrieved evidence"));
    }

    #[test]
    fn test_no_context_degrades_to_standard() {
        let prompt = compose_system_prompt(&inputs(10, None));
        let standard = [
            persona_section(&inputs(10, None)).unwrap(),
            evidence_priority_section(&inputs(10, None)).unwrap(),
        ]
        .join("\n\n");
        assert_eq!(prompt, standard);
    }

    #[test]
    fn test_persona_names_app() {
        let text = persona_section(&inputs(0, None)).unwrap();
        assert!(text.contains("the Acme IDE"));
        let bare = persona_section(&PromptInputs {
            app_context: None,
            ..inputs(0, None)
        })
        .unwrap();
        assert!(!bare.contains("running inside"));
    }

    #[test]
    fn test_details_bullets() {
        let ctx = sample_context();
        let details = project_details_section(&inputs(8, Some(&ctx))).unwrap();
        assert!(details.contains("- TypeScript (5.3): Typed JavaScript\n"));
        assert!(!details.contains("second line"));
        assert!(details.contains("### Frameworks\n- React"));
        assert!(details.contains("- Component-based UI: Views are composed"));
        assert!(details.contains("- Custom hooks"));
        assert!(details.contains("- Strict type checking"));
        assert!(!details.contains("Coding conventions"));
    }

    #[test]
    fn test_section_order() {
        let ctx = sample_context();
        let prompt = compose_system_prompt(&inputs(9, Some(&ctx)));
        let persona = prompt.find("expert software engineering assistant").unwrap();
        let evidence = prompt.find(EVIDENCE_OPEN).unwrap();
        let details = prompt.find("General project details").unwrap();
        let closing = prompt.find("state which source").unwrap();
        assert!(persona < evidence && evidence < details && details < closing);
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_relevance_score("7"), 7);
        assert_eq!(parse_relevance_score("Relevance: 10/10"), 10);
        assert_eq!(parse_relevance_score("I'd say 42... no, 3"), 3);
        assert_eq!(parse_relevance_score("0"), 0);
        assert_eq!(parse_relevance_score("very relevant"), DEFAULT_RELEVANCE_SCORE);
        assert_eq!(parse_relevance_score(""), DEFAULT_RELEVANCE_SCORE);
    }

    #[test]
    fn test_evidence_block() {
        assert!(format_evidence(&[]).is_none());
        let hit = ScoredRecord {
            record: VectorRecord {
                id: "1".to_string(),
                project_id: "p".to_string(),
                user_id: "u".to_string(),
                file_path: "src/auth.ts".to_string(),
                chunk_text: "export function login() {}\n".to_string(),
                embedding: vec![],
                chunk_sequence_number: 0,
                start_offset: 0,
                end_offset: 27,
                start_line: 3,
                end_line: 3,
                created_at: chrono::Utc::now(),
            },
            similarity: 0.912,
        };
        let block = format_evidence(&[hit]).unwrap();
        assert!(block.starts_with(EVIDENCE_OPEN));
        assert!(block.contains("--- src/auth.ts (lines 3-3, similarity 0.91) ---"));
        assert!(block.ends_with(EVIDENCE_CLOSE));

        let turn = compose_user_turn("How does login work?", Some(&block));
        assert!(turn.starts_with(EVIDENCE_OPEN));
        assert!(turn.ends_with("Question:\nHow does login work?"));
        assert_eq!(compose_user_turn("hi", None), "hi");
    }

    #[test]
    fn test_relevance_request_mentions_question() {
        let ctx = sample_context();
        let (system, user) = relevance_request("Where are hooks defined?", &ctx);
        assert!(system.contains("0 (unrelated) to 10"));
        assert!(user.contains("Technologies: TypeScript, React"));
        assert!(user.contains("Where are hooks defined?"));
    }
}
