/// Typed extraction of value pages and the instrument list from upstream payloads
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::error::{Result, SyncError};
use crate::source::literal::{parse_assignment, Literal};
use crate::types::{Category, InstrumentInfo, PagedValueResponse, ValueRecord};
use crate::utils::time::trading_close_instant;

/// Variable assigned by the value endpoint
pub const VALUE_VARIABLE: &str = "apidata";

/// Variable assigned by the list endpoint
pub const LIST_VARIABLE: &str = "r";

/// Number of fields in each list entry: id, abbreviation, name, category, pinyin
const LIST_ENTRY_LEN: usize = 5;

/// Upper bound on `pages`; far beyond any real fund history
pub const MAX_PAGES: u32 = 10_000;

const DATE_COLUMN: usize = 0;
const VALUE_COLUMN: usize = 2;

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("date pattern is valid"))
}

fn selector(css: &'static str) -> Result<Selector> {
    Selector::parse(css)
        .map_err(|e| SyncError::Internal(format!("invalid selector '{}': {}", css, e)))
}

/// Deserialize one page of the value endpoint
pub fn deserialize_value_page(raw: &str) -> Result<PagedValueResponse> {
    let assignment = parse_assignment(raw)?;
    if assignment.name != VALUE_VARIABLE {
        return Err(SyncError::deserialization(
            VALUE_VARIABLE,
            format!("expected an assignment to '{}', got '{}'", VALUE_VARIABLE, assignment.name),
        ));
    }
    let data = &assignment.value;
    if !matches!(data, Literal::Object(_)) {
        return Err(SyncError::deserialization(
            VALUE_VARIABLE,
            format!("expected an object, got {}", data.type_name()),
        ));
    }

    let content = data
        .get("content")
        .and_then(Literal::as_str)
        .ok_or_else(|| type_error("apidata.content", "string", data.get("content")))?;
    let total_pages = page_number(data, "pages")?;
    let current_page = page_number(data, "curpage")?;
    let records = match data.get("records") {
        None => None,
        Some(literal) => Some(non_negative_integer(literal).ok_or_else(|| {
            type_error("apidata.records", "non-negative integer", Some(literal))
        })?),
    };

    // An empty result still carries one placeholder row
    check_page_count(total_pages, records)?;

    let values = if records == Some(0) {
        Vec::new()
    } else {
        extract_values_from_html(content)?
    };

    Ok(PagedValueResponse {
        values,
        current_page,
        total_pages,
        records,
    })
}

/// Deserialize the instrument list
pub fn deserialize_instrument_list(raw: &str) -> Result<Vec<InstrumentInfo>> {
    let assignment = parse_assignment(raw)?;
    if assignment.name != LIST_VARIABLE {
        return Err(SyncError::deserialization(
            LIST_VARIABLE,
            format!("expected an assignment to '{}', got '{}'", LIST_VARIABLE, assignment.name),
        ));
    }
    let entries = assignment
        .value
        .as_array()
        .ok_or_else(|| type_error(LIST_VARIABLE, "array", Some(&assignment.value)))?;

    entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| extract_instrument(idx, entry))
        .collect()
}

fn extract_instrument(idx: usize, entry: &Literal) -> Result<InstrumentInfo> {
    let field = format!("r[{}]", idx);
    let fields = entry
        .as_array()
        .ok_or_else(|| type_error(&field, "array", Some(entry)))?;
    if fields.len() != LIST_ENTRY_LEN {
        return Err(SyncError::deserialization(
            field,
            format!("expected {} elements, got {}", LIST_ENTRY_LEN, fields.len()),
        ));
    }

    let string_at = |pos: usize, name: &str| -> Result<String> {
        fields[pos]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| type_error(&format!("r[{}].{}", idx, name), "string", Some(&fields[pos])))
    };

    let id = string_at(0, "id")?;
    let name = string_at(2, "name")?;
    let label = string_at(3, "category")?;
    let category = Category::from_label(&label).ok_or_else(|| {
        SyncError::deserialization(
            format!("r[{}].category", idx),
            format!("unknown category label '{}' for instrument {}", label, id),
        )
    })?;

    Ok(InstrumentInfo { id, name, category })
}

fn extract_values_from_html(html: &str) -> Result<Vec<ValueRecord>> {
    let fragment = Html::parse_fragment(html);
    let row_selector = selector("tbody > tr")?;
    let cell_selector = selector("td")?;

    let mut values = Vec::new();
    for (row_idx, row) in fragment.select(&row_selector).enumerate() {
        let cells: Vec<ElementRef> = row.select(&cell_selector).collect();
        // Header rows only carry <th>
        if cells.is_empty() {
            continue;
        }

        let date_text = cell_text(&cells, DATE_COLUMN);
        let date = date_text
            .as_deref()
            .filter(|text| date_pattern().is_match(text))
            .and_then(|text| NaiveDate::parse_from_str(text, "%Y-%m-%d").ok())
            .ok_or_else(|| {
                SyncError::deserialization(
                    "date",
                    format!(
                        "row {}: expected yyyy-mm-dd in column {}, got {:?}, html: {}",
                        row_idx,
                        DATE_COLUMN,
                        date_text.as_deref().unwrap_or_default(),
                        row.html()
                    ),
                )
            })?;

        let value_text = cell_text(&cells, VALUE_COLUMN);
        let value = value_text
            .as_deref()
            .and_then(|text| text.parse::<f64>().ok())
            .filter(|value| value.is_finite())
            .ok_or_else(|| {
                SyncError::deserialization(
                    "value",
                    format!(
                        "row {}: expected a float in column {}, got {:?}, html: {}",
                        row_idx,
                        VALUE_COLUMN,
                        value_text.as_deref().unwrap_or_default(),
                        row.html()
                    ),
                )
            })?;

        values.push(ValueRecord::new(trading_close_instant(date), value));
    }

    Ok(values)
}

fn cell_text(cells: &[ElementRef], column: usize) -> Option<String> {
    cells.get(column).map(|cell| cell.text().collect::<String>())
}

fn page_number(data: &Literal, key: &str) -> Result<u32> {
    let field = format!("{}.{}", VALUE_VARIABLE, key);
    let literal = data.get(key);
    literal
        .and_then(non_negative_integer)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| type_error(&field, "non-negative integer", literal))
}

/// Every page carries at least one row, so `pages` can never exceed `records`
fn check_page_count(total_pages: u32, records: Option<u64>) -> Result<()> {
    let field = format!("{}.pages", VALUE_VARIABLE);
    if total_pages > MAX_PAGES {
        return Err(SyncError::deserialization(
            field,
            format!("{} pages exceeds the limit of {}", total_pages, MAX_PAGES),
        ));
    }
    if let Some(records) = records {
        if u64::from(total_pages) > records.max(1) {
            return Err(SyncError::deserialization(
                field,
                format!("{} pages cannot hold only {} records", total_pages, records),
            ));
        }
    }
    Ok(())
}

fn non_negative_integer(literal: &Literal) -> Option<u64> {
    literal
        .as_f64()
        .filter(|n| *n >= 0.0 && n.fract() == 0.0 && *n <= u64::MAX as f64)
        .map(|n| n as u64)
}

fn type_error(field: &str, expected: &str, got: Option<&Literal>) -> SyncError {
    let got = match got {
        Some(literal) => literal.type_name(),
        None => "nothing",
    };
    SyncError::deserialization(field, format!("expected {}, got {}", expected, got))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALUE_PAGE: &str = r#"var apidata={ content:"<table class='w782 comm lsjz'><thead><tr><th class='first'>净值日期</th><th>单位净值</th><th>累计净值</th><th>日增长率</th><th>申购状态</th><th>赎回状态</th><th class='tor last'>分红送配</th></tr></thead><tbody><tr><td>2020-04-24</td><td class='tor bold'>3.7510</td><td class='tor bold'>3.7510</td><td class='tor bold grn'>-1.16%</td><td>开放申购</td><td>开放赎回</td><td class='red unbold'></td></tr><tr><td>2020-04-23</td><td class='tor bold'>3.7950</td><td class='tor bold'>3.7950</td><td class='tor bold grn'>-1.07%</td><td>开放申购</td><td>开放赎回</td><td class='red unbold'></td></tr></tbody></table>",records:2102,pages:211,curpage:4};"#;

    const LIST_PAGE: &str = r#"var r = [["000001","HXCZHH","华夏成长混合","混合型","HUAXIACHENGZHANGHUNHE"],["000002","HXCZHH","华夏成长混合(后端)","股票指数","HUAXIACHENGZHANGHUNHE"]];"#;

    fn page_with_rows(rows: &str) -> String {
        format!(
            r#"var apidata={{ content:"<table><tbody>{}</tbody></table>",records:1,pages:1,curpage:1}};"#,
            rows
        )
    }

    #[test]
    fn test_value_page_roundtrip() {
        let page = deserialize_value_page(VALUE_PAGE).unwrap();

        assert_eq!(page.total_pages, 211);
        assert_eq!(page.current_page, 4);
        assert_eq!(page.records, Some(2102));
        assert_eq!(page.values.len(), 2);
        assert_eq!(page.values[0].time.to_rfc3339(), "2020-04-24T07:00:00+00:00");
        assert_eq!(page.values[0].value, 3.751);
        assert_eq!(page.values[1].time.to_rfc3339(), "2020-04-23T07:00:00+00:00");
        assert_eq!(page.values[1].value, 3.795);
    }

    #[test]
    fn test_identical_input_gives_identical_output() {
        assert_eq!(
            deserialize_value_page(VALUE_PAGE).unwrap(),
            deserialize_value_page(VALUE_PAGE).unwrap()
        );
    }

    #[test]
    fn test_missing_apidata() {
        let err = deserialize_value_page(r#"var a = "response""#).unwrap_err();
        assert_eq!(err.field(), Some("apidata"));
    }

    #[test]
    fn test_missing_content() {
        let err = deserialize_value_page("var apidata = { pages: 1, curpage: 2 }").unwrap_err();
        assert_eq!(err.field(), Some("apidata.content"));
    }

    #[test]
    fn test_content_with_wrong_type() {
        let err = deserialize_value_page("var apidata = { content: 1, pages: 1, curpage: 2 }")
            .unwrap_err();
        assert_eq!(err.field(), Some("apidata.content"));
        assert!(err.to_string().contains("expected string, got number"));
    }

    #[test]
    fn test_missing_pages() {
        let err = deserialize_value_page(r#"var apidata = { content: "", curpage: 2 }"#).unwrap_err();
        assert_eq!(err.field(), Some("apidata.pages"));
    }

    #[test]
    fn test_missing_curpage() {
        let err = deserialize_value_page(r#"var apidata = { pages: 1, content: "" }"#).unwrap_err();
        assert_eq!(err.field(), Some("apidata.curpage"));
    }

    #[test]
    fn test_pages_as_string_rejected() {
        let err = deserialize_value_page(r#"var apidata = { content: "", pages: "3", curpage: 1 }"#)
            .unwrap_err();
        assert_eq!(err.field(), Some("apidata.pages"));
    }

    #[test]
    fn test_negative_pages_message() {
        let err = deserialize_value_page(r#"var apidata = { content: "", pages: -1, curpage: 1 }"#)
            .unwrap_err();
        assert_eq!(err.field(), Some("apidata.pages"));
        assert!(err.to_string().contains("expected non-negative integer, got number"));
    }

    #[test]
    fn test_pages_above_limit_rejected() {
        let err = deserialize_value_page(
            r#"var apidata={ content:"<table><tbody><tr><td>2020-04-24</td><td>1</td><td>1</td></tr></tbody></table>",pages:4294967295,curpage:1};"#,
        )
        .unwrap_err();
        assert_eq!(err.field(), Some("apidata.pages"));
    }

    #[test]
    fn test_pages_exceeding_records_rejected() {
        let err = deserialize_value_page(
            r#"var apidata={ content:"<table><tbody><tr><td>2020-04-24</td><td>1</td><td>1</td></tr></tbody></table>",records:1,pages:4294967,curpage:1};"#,
        )
        .unwrap_err();
        assert_eq!(err.field(), Some("apidata.pages"));
        assert!(err.to_string().contains("cannot hold only 1 records"));
    }

    #[test]
    fn test_malformed_date_names_field_and_row() {
        let err = deserialize_value_page(&page_with_rows(
            "<tr><td>20200-04-24</td><td>123</td><td>123</td></tr>",
        ))
        .unwrap_err();

        assert_eq!(err.field(), Some("date"));
        assert!(err.to_string().contains("<td>20200-04-24</td>"));
    }

    #[test]
    fn test_impossible_date_rejected() {
        let err = deserialize_value_page(&page_with_rows(
            "<tr><td>2020-02-30</td><td>1</td><td>1.0</td></tr>",
        ))
        .unwrap_err();
        assert_eq!(err.field(), Some("date"));
    }

    #[test]
    fn test_malformed_value_names_field_and_row() {
        let err = deserialize_value_page(&page_with_rows(
            "<tr><td>2020-04-24</td><td>1</td><td>value</td></tr>",
        ))
        .unwrap_err();

        assert_eq!(err.field(), Some("value"));
        assert!(err.to_string().contains("<td>value</td>"));
    }

    #[test]
    fn test_missing_value_column() {
        let err = deserialize_value_page(&page_with_rows("<tr><td>2020-04-24</td><td>123</td></tr>"))
            .unwrap_err();
        assert_eq!(err.field(), Some("value"));
    }

    #[test]
    fn test_non_finite_value_rejected() {
        let err = deserialize_value_page(&page_with_rows(
            "<tr><td>2020-04-24</td><td>1</td><td>NaN</td></tr>",
        ))
        .unwrap_err();
        assert_eq!(err.field(), Some("value"));
    }

    #[test]
    fn test_empty_result_page() {
        let page = deserialize_value_page(
            r#"var apidata={ content:"<table><tbody><tr><td colspan='7' align='center'>暂无数据!</td></tr></tbody></table>",records:0,pages:0,curpage:1};"#,
        )
        .unwrap();

        assert!(page.values.is_empty());
        assert_eq!(page.total_pages, 0);
    }

    #[test]
    fn test_script_injection_rejected() {
        let err = deserialize_value_page(
            r#"var apidata={content:"",pages:1,curpage:1}; require('child_process')"#,
        )
        .unwrap_err();
        assert_eq!(err.field(), Some("script"));
    }

    #[test]
    fn test_list_roundtrip() {
        let list = deserialize_instrument_list(LIST_PAGE).unwrap();

        assert_eq!(
            list,
            vec![
                InstrumentInfo {
                    id: "000001".to_string(),
                    name: "华夏成长混合".to_string(),
                    category: Category::Mixed,
                },
                InstrumentInfo {
                    id: "000002".to_string(),
                    name: "华夏成长混合(后端)".to_string(),
                    category: Category::Index,
                },
            ]
        );
    }

    #[test]
    fn test_list_must_be_array() {
        let err = deserialize_instrument_list(r#"var r = """#).unwrap_err();
        assert_eq!(err.field(), Some("r"));
    }

    #[test]
    fn test_list_entry_must_be_array() {
        let err = deserialize_instrument_list(r#"var r = ["aa"]"#).unwrap_err();
        assert_eq!(err.field(), Some("r[0]"));
    }

    #[test]
    fn test_list_entry_needs_five_elements() {
        let err = deserialize_instrument_list(r#"var r = [["1", "2", "3"]]"#).unwrap_err();
        assert_eq!(err.field(), Some("r[0]"));
        assert!(err.to_string().contains("expected 5 elements, got 3"));
    }

    #[test]
    fn test_list_field_types() {
        let id = deserialize_instrument_list(r#"var r = [[1, "a", "b", "混合型", "d"]]"#).unwrap_err();
        let name = deserialize_instrument_list(r#"var r = [["1", "a", 2, "混合型", "d"]]"#).unwrap_err();
        let label = deserialize_instrument_list(r#"var r = [["1", "a", "b", null, "d"]]"#).unwrap_err();

        assert_eq!(id.field(), Some("r[0].id"));
        assert_eq!(name.field(), Some("r[0].name"));
        assert_eq!(label.field(), Some("r[0].category"));
    }

    #[test]
    fn test_unknown_category_is_hard_error() {
        let err = deserialize_instrument_list(
            r#"var r = [["000001","A","name","混合型","P"],["000003","B","name","REITs","P"]]"#,
        )
        .unwrap_err();

        assert_eq!(err.field(), Some("r[1].category"));
        assert!(err.to_string().contains("REITs"));
    }
}
