//! Parsing of results-table snapshots.
//!
//! The portal renders one section per document type, headed by an `<h5>`
//! with the document name, with one nested `<tbody>` row per year. A row
//! whose year has published files carries a "Exibir lista de documentos"
//! button. Snapshots are parsed into owned values and dropped immediately,
//! so no parsed DOM is ever held across a page interaction.

use crate::session::scripts::ROW_BUTTON;
use crate::session::RowButton;
use scraper::{ElementRef, Html, Selector};

/// One year row under a document heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRow {
    /// Text of the row's first cell.
    pub year: String,
    /// The row's dialog button, if the row has one.
    pub button: Option<RowButton>,
}

/// Trim and collapse internal whitespace runs to a single space.
pub fn normalize_space(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Concatenated text nodes that are direct children of `el`.
pub(crate) fn own_text(el: &ElementRef<'_>) -> String {
    el.children()
        .filter_map(|child| child.value().as_text().map(|t| t.to_string()))
        .collect()
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector is valid")
}

/// Rows of the section whose `<h5>` heading contains `document_key`.
///
/// Returns `None` when no such heading exists: not every document type is
/// published for every facet combination. Rows are the `<tr>` children of
/// every `<tbody>` nested inside the outermost `<tbody>` enclosing the
/// heading, in document order. Rows without a first cell are dropped.
pub fn section_rows(html: &str, document_key: &str) -> Option<Vec<DocumentRow>> {
    let document = Html::parse_document(html);
    let h5 = selector("h5");
    let first_cell = selector("td:first-child");
    let button_sel = selector(ROW_BUTTON);

    let heading = document
        .select(&h5)
        .find(|h| own_text(h).contains(document_key))?;

    let Some(scope) = heading
        .ancestors()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "tbody")
        .last()
    else {
        return Some(Vec::new());
    };

    // Buttons are addressed by page-wide position, matching querySelectorAll.
    let all_buttons: Vec<_> = document.select(&button_sel).map(|b| b.id()).collect();

    let rows = scope
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .filter(|tr| tr.value().name() == "tr")
        .filter(|tr| {
            tr.parent()
                .and_then(ElementRef::wrap)
                .is_some_and(|p| p.value().name() == "tbody" && p.id() != scope.id())
        })
        .filter_map(|tr| {
            let cell = tr.select(&first_cell).next()?;
            let year = normalize_space(&cell.text().collect::<String>());
            let button = tr
                .select(&button_sel)
                .next()
                .and_then(|b| all_buttons.iter().position(|id| *id == b.id()))
                .map(|index| RowButton { index });
            Some(DocumentRow { year, button })
        })
        .collect();

    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
        <form><select name="uf"></select></form>
        <table class="table table-hover">
          <tbody>
            <tr><td>
              <h5>Plano de Saúde</h5>
              <table><tbody>
                <tr><td>2019</td><td><button title="Exibir lista de documentos">ver</button></td></tr>
                <tr><td> 2020 </td><td><button title="Exibir lista de documentos">ver</button></td></tr>
                <tr><td>2021</td><td>Não enviado</td></tr>
              </tbody></table>
            </td></tr>
          </tbody>
          <tbody>
            <tr><td>
              <h5>Relatório Anual de Gestão</h5>
              <table><tbody>
                <tr><td>2022</td><td><button title="Exibir lista de documentos">ver</button></td></tr>
              </tbody></table>
            </td></tr>
          </tbody>
        </table>
        </body></html>
    "#;

    #[test]
    fn test_section_rows_under_heading() {
        let rows = section_rows(PAGE, "Plano de Saúde").unwrap();
        assert_eq!(
            rows,
            vec![
                DocumentRow { year: "2019".into(), button: Some(RowButton { index: 0 }) },
                DocumentRow { year: "2020".into(), button: Some(RowButton { index: 1 }) },
                DocumentRow { year: "2021".into(), button: None },
            ]
        );
    }

    #[test]
    fn test_button_index_is_page_wide() {
        let rows = section_rows(PAGE, "Relatório Anual de Gestão").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].button, Some(RowButton { index: 2 }));
    }

    #[test]
    fn test_missing_heading_is_none() {
        assert!(section_rows(PAGE, "Programação Anual de Saúde").is_none());
    }

    #[test]
    fn test_heading_outside_table_has_no_rows() {
        let html = "<html><body><h5>RAG</h5></body></html>";
        assert_eq!(section_rows(html, "RAG"), Some(Vec::new()));
    }

    #[test]
    fn test_normalize_space() {
        assert_eq!(normalize_space("  Plano   de\nSaúde "), "Plano de Saúde");
        assert_eq!(normalize_space(""), "");
    }
}
