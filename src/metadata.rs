//! Assembles extracted paper metadata into the flat field records each
//! submission workflow expects. One assembler per [`ExtractionMode`].

use crate::batch::{ExtractionMode, FieldSet};
use crate::llm::types::{Author, PaperMeta};

/// Build the mode-specific record for one document.
pub fn assemble(mode: ExtractionMode, meta: &PaperMeta, filename: &str) -> FieldSet {
    match mode {
        ExtractionMode::Sn => sn_record(meta, filename),
        ExtractionMode::Ieee => ieee_record(meta, filename),
        ExtractionMode::Funding => funding_record(meta, filename),
        ExtractionMode::Ap => ap_record(meta, filename),
    }
}

fn set(fields: &mut FieldSet, key: &str, value: Option<String>) {
    let value = value.filter(|v| !v.trim().is_empty());
    fields.insert(key.to_string(), value);
}

/// Springer Nature sheet: numbered author/affiliation columns (up to 5)
/// plus the corresponding author, falling back to the first author when
/// none is flagged.
fn sn_record(meta: &PaperMeta, filename: &str) -> FieldSet {
    let mut fields = FieldSet::new();
    set(&mut fields, "Number", Some(filename.to_string()));
    set(&mut fields, "Title", Some(meta.title.clone()));
    set(&mut fields, "SubTitle", None);

    for (i, author) in meta.authors.iter().take(5).enumerate() {
        let n = i + 1;
        set(&mut fields, &format!("Author {n}"), Some(author.name.clone()));
        set(
            &mut fields,
            &format!("Affiliation {n}"),
            meta.affiliation_of(author).map(str::to_string),
        );
    }

    let corresponding = meta.corresponding_author();
    set(
        &mut fields,
        "Corresponding Author",
        corresponding.map(|a| a.name.clone()),
    );
    set(
        &mut fields,
        "Corresponding Author Email",
        corresponding.and_then(|a| a.email.clone()),
    );
    fields
}

/// IEEE order sheet: one joined author list and the first author's email,
/// falling back to the corresponding author's.
fn ieee_record(meta: &PaperMeta, filename: &str) -> FieldSet {
    let all_authors = meta
        .authors
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let first_author_email = meta
        .authors
        .first()
        .and_then(|a| a.email.clone())
        .or_else(|| {
            meta.authors
                .iter()
                .find(|a| a.is_corresponding_author)
                .and_then(|a| a.email.clone())
        });

    let mut fields = FieldSet::new();
    set(&mut fields, "Order Number", Some(filename.to_string()));
    set(&mut fields, "Title", Some(meta.title.clone()));
    set(&mut fields, "Subtitle", None);
    set(&mut fields, "Authors", Some(all_authors));
    set(&mut fields, "First Author Email", first_author_email);
    fields
}

/// Funding collection sheet: first and corresponding author with their
/// affiliations, keywords, and abstract. Acknowledgment text lives on the
/// back pages, which are not part of the submitted first-page text, so
/// the column is always empty here.
fn funding_record(meta: &PaperMeta, filename: &str) -> FieldSet {
    let first = meta.authors.first();
    let corresponding = meta.corresponding_author();

    let mut fields = FieldSet::new();
    set(&mut fields, "Filename", Some(filename.to_string()));
    set(&mut fields, "Title", Some(meta.title.clone()));
    set(&mut fields, "First Author", first.map(|a| a.name.clone()));
    set(
        &mut fields,
        "First Author Affiliation",
        first.and_then(|a| meta.affiliation_of(a)).map(str::to_string),
    );
    set(
        &mut fields,
        "Corresponding Author",
        corresponding.map(|a| a.name.clone()),
    );
    set(
        &mut fields,
        "Corresponding Author Affiliation",
        corresponding
            .and_then(|a| meta.affiliation_of(a))
            .map(str::to_string),
    );
    set(
        &mut fields,
        "Corresponding Author Email",
        corresponding.and_then(|a| a.email.clone()),
    );
    set(&mut fields, "Keywords", Some(meta.keywords.join(", ")));
    set(&mut fields, "Abstract", meta.abstract_text.clone());
    set(&mut fields, "Acknowledgment", None);
    fields
}

/// Author-profile sheet: given/family name split for the first author,
/// and for the corresponding author only when they differ.
fn ap_record(meta: &PaperMeta, filename: &str) -> FieldSet {
    let mut fields = FieldSet::new();
    set(&mut fields, "Title", Some(meta.title.clone()));
    set(&mut fields, "Keywords", Some(meta.keywords.join(", ")));
    set(&mut fields, "Abstract", meta.abstract_text.clone());
    set(&mut fields, "Filename", Some(filename.to_string()));

    let first = meta.authors.first();
    if let Some(author) = first {
        let (given, family) = split_name(&author.name);
        set(&mut fields, "First Author Given Name", given);
        set(&mut fields, "First Author Family Name", family);
    }

    let corresponding = meta.authors.iter().find(|a| a.is_corresponding_author);
    if let (Some(corr), Some(first)) = (corresponding, first) {
        if corr != first {
            let (given, family) = split_name(&corr.name);
            set(&mut fields, "Corresponding Author Given Name", given);
            set(&mut fields, "Corresponding Author Family Name", family);
        }
    }
    fields
}

/// Split "Given [Middle] Family" on whitespace; the last token is the
/// family name.
fn split_name(name: &str) -> (Option<String>, Option<String>) {
    let parts: Vec<&str> = name.split_whitespace().collect();
    match parts.as_slice() {
        [] => (None, None),
        [only] => (None, Some((*only).to_string())),
        [given @ .., family] => (Some(given.join(" ")), Some((*family).to_string())),
    }
}
