use crate::datetime::{SaleDateTime, normalize_sale_time, parse_loose_date, parse_sale_datetime};
use crate::error::ParseError;
use crate::html::{element_text, first_text, selector};
use crate::model::{CandidatePhase, PhaseHint};
use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, warn};

static HEADING: LazyLock<Selector> = LazyLock::new(|| selector("h1, h2, h3, h4, h5, h6"));
static TABLE_LIKE: LazyLock<Selector> = LazyLock::new(|| selector(".responsive-table, table"));
static RESPONSIVE_TABLE: LazyLock<Selector> = LazyLock::new(|| selector(".responsive-table"));
static TABLE: LazyLock<Selector> = LazyLock::new(|| selector("table"));
static BODY_ROW: LazyLock<Selector> = LazyLock::new(|| selector("tbody tr"));
static ROW: LazyLock<Selector> = LazyLock::new(|| selector("tr"));
static CELL: LazyLock<Selector> = LazyLock::new(|| selector("td, th"));
static STRONG: LazyLock<Selector> = LazyLock::new(|| selector("strong"));
static LIST_ITEM: LazyLock<Selector> = LazyLock::new(|| selector(".ticket-list__item"));
static LIST_ITEM_TEXT: LazyLock<Selector> =
    LazyLock::new(|| selector(".ticket-list__item-text"));
static LIST_ITEM_DATE: LazyLock<Selector> =
    LazyLock::new(|| selector(".ticket-list__item-date"));

static RE_LIST_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\w+\s+\w+\s+\d+)\s*-\s*(\d+:\d+)").expect("list entry regex must compile")
});

const TABLE_KEYWORDS: [&str; 3] = ["sales phase", "who can buy", "sale date"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTier {
    LabeledTable,
    GenericTable,
    KeywordTable,
    ListItems,
}

type TierFn = fn(&Html, NaiveDate) -> Vec<CandidatePhase>;

/// Tried in order; the first tier that finds anything wins.
const TIERS: [(PhaseTier, TierFn); 4] = [
    (PhaseTier::LabeledTable, labeled_table_phases),
    (PhaseTier::GenericTable, generic_table_phases),
    (PhaseTier::KeywordTable, keyword_table_phases),
    (PhaseTier::ListItems, list_item_phases),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseExtraction {
    /// The tier that produced `phases`, or `None` when nothing was found.
    pub tier: Option<PhaseTier>,
    pub phases: Vec<CandidatePhase>,
}

pub fn extract_phases(markup: &str, today: NaiveDate) -> PhaseExtraction {
    let html = Html::parse_document(markup);

    for (tier, run) in TIERS {
        let phases = dedupe_by_name(run(&html, today));
        if !phases.is_empty() {
            debug!(tier = ?tier, phases = phases.len(), "sales phases extracted");
            return PhaseExtraction {
                tier: Some(tier),
                phases,
            };
        }
    }

    warn!(error = %ParseError::NoPhases, "treating page as having zero phases");
    PhaseExtraction::default()
}

/// A table introduced by a "Sales phases" heading.
pub fn labeled_table_phases(html: &Html, today: NaiveDate) -> Vec<CandidatePhase> {
    for heading in html.select(&HEADING) {
        if !element_text(heading)
            .to_lowercase()
            .contains("sales phases")
        {
            continue;
        }

        // Headings are sometimes wrapped, so look past the wrapper as well.
        let following = heading.next_siblings().chain(
            heading
                .parent()
                .into_iter()
                .flat_map(|parent| parent.next_siblings()),
        );
        let Some(table) = following.filter_map(ElementRef::wrap).find_map(table_like) else {
            continue;
        };

        let phases = phases_from_table(table, today);
        if !phases.is_empty() {
            return phases;
        }
    }
    Vec::new()
}

pub fn generic_table_phases(html: &Html, today: NaiveDate) -> Vec<CandidatePhase> {
    html.select(&RESPONSIVE_TABLE)
        .flat_map(|table| phases_from_table(table, today))
        .collect()
}

/// Any table whose headers mention one of the phase columns.
pub fn keyword_table_phases(html: &Html, today: NaiveDate) -> Vec<CandidatePhase> {
    html.select(&TABLE)
        .filter(|table| {
            table_rows(*table).first().is_some_and(|header| {
                header.select(&CELL).any(|cell| {
                    let text = element_text(cell).to_lowercase();
                    TABLE_KEYWORDS.iter().any(|keyword| text.contains(keyword))
                })
            })
        })
        .flat_map(|table| phases_from_table(table, today))
        .collect()
}

pub fn list_item_phases(html: &Html, today: NaiveDate) -> Vec<CandidatePhase> {
    html.select(&LIST_ITEM)
        .filter_map(|item| {
            let name = first_text(item, &LIST_ITEM_TEXT)?;
            let info = first_text(item, &LIST_ITEM_DATE)?;
            Some(phase_from_list_entry(name, &info, today))
        })
        .collect()
}

/// Phases built from listing-card hints, used when a detail page had none.
pub fn phases_from_hints(hints: &[PhaseHint], today: NaiveDate) -> Vec<CandidatePhase> {
    dedupe_by_name(
        hints
            .iter()
            .map(|hint| phase_from_list_entry(hint.name.clone(), &hint.date_text, today))
            .collect(),
    )
}

fn phase_from_list_entry(name: String, info: &str, today: NaiveDate) -> CandidatePhase {
    let mut sale = SaleDateTime::default();

    match RE_LIST_ENTRY.captures(info) {
        Some(caps) => {
            match parse_loose_date(&caps[1], today) {
                Ok(date) => sale.date = Some(date),
                Err(err) => warn!(phase = %name, error = %err, "could not parse list sale date"),
            }
            match normalize_sale_time(&caps[2]) {
                Ok(time) => sale.time = Some(time),
                Err(err) => warn!(phase = %name, error = %err, "could not parse list sale time"),
            }
        }
        None => warn!(phase = %name, text = %info, "unrecognised sale date text"),
    }

    CandidatePhase {
        who_can_buy: Some(name.clone()),
        name,
        points_required: None,
        sale_date: sale.date,
        sale_time: sale.time,
    }
}

fn table_like(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    let value = element.value();
    if value.name() == "table" || value.classes().any(|class| class == "responsive-table") {
        return Some(element);
    }
    element.select(&TABLE_LIKE).next()
}

#[derive(Debug, Default)]
struct ColumnRoles {
    name: Option<usize>,
    who_can_buy: Option<usize>,
    points_required: Option<usize>,
    sale_date: Option<usize>,
    sale_time: Option<usize>,
}

impl ColumnRoles {
    fn from_header(row: ElementRef<'_>) -> Self {
        let mut roles = Self::default();
        for (idx, cell) in row.select(&CELL).enumerate() {
            let label = first_text(cell, &STRONG)
                .unwrap_or_else(|| element_text(cell))
                .to_lowercase();
            let slot = if label.contains("sales phase") {
                &mut roles.name
            } else if label.contains("who can buy") {
                &mut roles.who_can_buy
            } else if label.contains("points required") {
                &mut roles.points_required
            } else if label.contains("sale date") {
                &mut roles.sale_date
            } else if label.contains("sale time") {
                &mut roles.sale_time
            } else {
                continue;
            };
            slot.get_or_insert(idx);
        }
        roles
    }
}

/// Body rows, header first. Tables without a `tbody` fall back to every row.
fn table_rows(table: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    let body = table.select(&BODY_ROW).collect::<Vec<_>>();
    if body.is_empty() {
        table.select(&ROW).collect()
    } else {
        body
    }
}

fn phases_from_table(table: ElementRef<'_>, today: NaiveDate) -> Vec<CandidatePhase> {
    let mut rows = table_rows(table).into_iter();
    let Some(header) = rows.next() else {
        return Vec::new();
    };
    let roles = ColumnRoles::from_header(header);
    let Some(name_idx) = roles.name else {
        return Vec::new();
    };

    rows.filter_map(|row| {
        let cells: Vec<String> = row.select(&CELL).map(element_text).collect();
        let cell = |idx: Option<usize>| {
            idx.and_then(|i| cells.get(i))
                .filter(|text| !text.is_empty())
                .cloned()
        };

        let name = cell(Some(name_idx))?;
        let sale_date = cell(roles.sale_date);
        let sale_time = cell(roles.sale_time);
        let sale = parse_sale_datetime(sale_date.as_deref(), sale_time.as_deref(), today);

        Some(CandidatePhase {
            name,
            who_can_buy: cell(roles.who_can_buy),
            points_required: cell(roles.points_required),
            sale_date: sale.date,
            sale_time: sale.time,
        })
    })
    .collect()
}

fn dedupe_by_name(phases: Vec<CandidatePhase>) -> Vec<CandidatePhase> {
    let mut seen = HashSet::new();
    phases
        .into_iter()
        .filter(|phase| {
            let first = seen.insert(phase.name.clone());
            if !first {
                warn!(phase = %phase.name, "duplicate sales phase row ignored");
            }
            first
        })
        .collect()
}
