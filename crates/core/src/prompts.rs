use crate::models::Segment;

pub const SYSTEM_PROMPT: &str = "Du bist ein hilfreicher Assistent und Experte für Steuerrecht. Du antwortest direkt dem Kunden, der Fragen zu den Dokumenten hat.";

const USER_PROMPT: &str = r#"
Du bist beauftragt, Fragen anhand der bereitgestellten Dokumente zu beantworten. Ich stelle dir eine Frage und eine Liste von Dokumenten vor, die relevant für die Frage sind.

Du beantwortest die Frage basierend auf den Informationen in den Dokumenten. Wenn die Frage nicht anhand der Dokumente beantwortet werden kann, gib "Hoppla! Zu der Frage konnten keine Informationen gefunden werden." zurück.

Deine Antwort sollte immer eine Erklärung in einfacher Sprache enthalten, wenn nötig zusätzlich eine genaue Erklärung und in jedem Fall Quellen enthalten.

Beispiel:

Dokumente:
....

Frage: Wie hoch ist der Grundfreibetrag bei der Einkommensteuer?

Antwort:
Der Grundfreibetrag bei der Einkommensteuer beträgt 11 784 Euro.

Quelle:
Die geht aus dem Dokument "Einkommensteuergesetz.pdf" Seite 10-11 hervor:
"§ 32a Einkommensteuertarif. [...] Die tarifliche Einkommensteuer bemisst sich nach dem auf volle Euro abgerundeten zu versteuernden Einkommen. Sie beträgt ab dem Veranlagungszeitraum 2024 [...] bis 11 784 Euro (Grundfreibetrag)."

Dokumente:
{documents}

Frage: {question}

Antwort:
"#;

/// Numbered hit list with provenance, one block per segment.
pub fn render_documents(segments: &[Segment]) -> String {
    let total = segments.len();
    segments
        .iter()
        .enumerate()
        .map(|(position, segment)| {
            format!(
                "Treffer {} von {}:\nDatei {} Seite {} vom {}\n{}\n\n",
                position + 1,
                total,
                segment.source_filename,
                segment.page,
                segment.document_date_label(),
                segment.text
            )
        })
        .collect()
}

pub fn build_user_prompt(question: &str, segments: &[Segment]) -> String {
    let documents = render_documents(segments);
    fill_placeholders(
        USER_PROMPT,
        &[("{documents}", documents.as_str()), ("{question}", question)],
    )
}

/// Single left-to-right pass; inserted values are never scanned again.
fn fill_placeholders(template: &str, values: &[(&str, &str)]) -> String {
    let mut filled = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        filled.push_str(&rest[..start]);
        let tail = &rest[start..];
        match values.iter().find(|(key, _)| tail.starts_with(key)) {
            Some((key, value)) => {
                filled.push_str(value);
                rest = &tail[key.len()..];
            }
            None => {
                filled.push('{');
                rest = &tail[1..];
            }
        }
    }

    filled.push_str(rest);
    filled
}
