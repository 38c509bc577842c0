// Table extraction on top of `scraper`: every <table> on the page with its
// classes and the trimmed text of each cell.

use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

static TABLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table").expect("table selector"));
static ROW: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").expect("row selector"));
static CELL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td, th").expect("cell selector"));

#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub is_header: bool,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub classes: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c.eq_ignore_ascii_case(class))
    }

    /// 第一個含有 th 的列，沒有的話用第一列
    pub fn header_row(&self) -> Option<(usize, Vec<String>)> {
        let index = self
            .rows
            .iter()
            .position(|row| row.iter().any(|c| c.is_header))
            .or(if self.rows.is_empty() { None } else { Some(0) })?;
        let labels = self.rows[index]
            .iter()
            .map(|c| c.text.to_lowercase())
            .collect();
        Some((index, labels))
    }

    /// 標題列之後只有 td 的列
    pub fn data_rows(&self) -> impl Iterator<Item = Vec<&str>> + '_ {
        let skip = self.header_row().map(|(index, _)| index + 1).unwrap_or(0);
        self.rows
            .iter()
            .skip(skip)
            .filter(|row| !row.is_empty() && row.iter().all(|c| !c.is_header))
            .map(|row| row.iter().map(|c| c.text.as_str()).collect())
    }
}

pub fn tables(html: &str) -> Vec<Table> {
    let document = Html::parse_document(html);
    document
        .select(&TABLE)
        .map(|table| Table {
            classes: table.value().classes().map(str::to_string).collect(),
            rows: table
                .select(&ROW)
                .filter(|row| closest(*row, "table") == Some(table))
                .map(|row| {
                    row.select(&CELL)
                        .filter(|cell| closest(*cell, "tr") == Some(row))
                        .map(|cell| Cell {
                            is_header: cell.value().name().eq_ignore_ascii_case("th"),
                            text: cell_text(cell),
                        })
                        .collect()
                })
                .collect(),
        })
        .collect()
}

// 巢狀表格的列與儲存格只屬於最內層的 table / tr
fn closest<'a>(element: ElementRef<'a>, name: &str) -> Option<ElementRef<'a>> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == name)
}

/// 儲存格文字，空白壓縮成單一空格 (&nbsp; 也算空白)
pub fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
