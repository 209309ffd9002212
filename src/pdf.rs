//! Templated PDF layouts: intake summaries (uploaded to the EHR) and
//! invoices.
//!
//! Pages use the standard Helvetica fonts with WinAnsi encoding, so nothing
//! is embedded. Text outside Latin-1 is replaced with `?`.

use chrono::DateTime;
use pdf_writer::{Content, Finish, Name, Pdf, Rect, Ref, Str, TextStr};

use crate::models::{Address, PaidOrder};
use crate::pricing::format_cents;

const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
const MARGIN: f32 = 54.0;
const VALUE_COLUMN: f32 = 200.0;
/// Rough character budget for 10pt Helvetica across the content width.
const WRAP_CHARS: usize = 95;
const VALUE_WRAP_CHARS: usize = WRAP_CHARS - 25;

const REGULAR: Name<'static> = Name(b"F1");
const BOLD: Name<'static> = Name(b"F2");

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Title(String),
    Heading(String),
    Text(String),
    /// Label in bold, value in the second column
    Field(String, String),
    /// Description left, amount right-aligned
    Amount(String, String),
    Rule,
    Spacer,
}

impl Block {
    fn height(&self) -> f32 {
        match self {
            Block::Title(_) => 28.0,
            Block::Heading(_) => 22.0,
            Block::Text(_) | Block::Field(..) | Block::Amount(..) => 14.0,
            Block::Rule => 10.0,
            Block::Spacer => 8.0,
        }
    }
}

/// WinAnsi bytes for `text`. Latin-1 maps one to one.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\n' | '\r' | '\t' => b' ',
            c if c.is_ascii() && !c.is_ascii_control() => c as u8,
            c if ('\u{A0}'..='\u{FF}').contains(&c) => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

/// Greedy word wrap. Words longer than `width` are split across lines.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let chars: Vec<char> = word.chars().collect();
        for piece in chars.chunks(width) {
            if current_len > 0 && current_len + 1 + piece.len() > width {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current.extend(piece);
            current_len += piece.len();
        }
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

fn show(content: &mut Content, font: Name, size: f32, x: f32, y: f32, text: &str) {
    content
        .begin_text()
        .set_font(font, size)
        .next_line(x, y)
        .show(Str(&win_ansi(text)))
        .end_text();
}

/// Approximate Helvetica width, for right-aligning short amounts.
fn approx_width(text: &str, size: f32) -> f32 {
    text.chars().count() as f32 * size * 0.55
}

/// Split wrapped text into one block per line so page breaks see real
/// line counts.
fn expand(blocks: &[Block]) -> Vec<Block> {
    let mut expanded = Vec::with_capacity(blocks.len());
    for block in blocks {
        match block {
            Block::Text(text) => {
                expanded.extend(wrap(text, WRAP_CHARS).into_iter().map(Block::Text));
            }
            Block::Field(label, value) => {
                let mut lines = wrap(value, VALUE_WRAP_CHARS).into_iter();
                expanded.push(Block::Field(label.clone(), lines.next().unwrap_or_default()));
                expanded.extend(lines.map(|l| Block::Field(String::new(), l)));
            }
            other => expanded.push(other.clone()),
        }
    }
    expanded
}

/// Lay blocks out top to bottom, starting new pages as needed. Returns one
/// content stream per page.
fn layout(blocks: &[Block]) -> Vec<Content> {
    let mut pages = Vec::new();
    let mut content = Content::new();
    let mut y = PAGE_HEIGHT - MARGIN;

    for block in &expand(blocks) {
        if y - block.height() < MARGIN {
            pages.push(std::mem::replace(&mut content, Content::new()));
            y = PAGE_HEIGHT - MARGIN;
        }
        y -= block.height();
        match block {
            Block::Title(text) => show(&mut content, BOLD, 18.0, MARGIN, y + 6.0, text),
            Block::Heading(text) => show(&mut content, BOLD, 12.0, MARGIN, y + 4.0, text),
            Block::Text(text) => show(&mut content, REGULAR, 10.0, MARGIN, y, text),
            Block::Field(label, value) => {
                if !label.is_empty() {
                    show(&mut content, BOLD, 10.0, MARGIN, y, label);
                }
                show(&mut content, REGULAR, 10.0, VALUE_COLUMN, y, value);
            }
            Block::Amount(label, amount) => {
                show(&mut content, REGULAR, 10.0, MARGIN, y, label);
                let x = PAGE_WIDTH - MARGIN - approx_width(amount, 10.0);
                show(&mut content, REGULAR, 10.0, x, y, amount);
            }
            Block::Rule => {
                content
                    .set_line_width(0.5)
                    .move_to(MARGIN, y + 4.0)
                    .line_to(PAGE_WIDTH - MARGIN, y + 4.0)
                    .stroke();
            }
            Block::Spacer => {}
        }
    }
    pages.push(content);
    pages
}

/// Render blocks into a complete PDF file.
pub fn render(title: &str, blocks: &[Block]) -> Vec<u8> {
    let pages = layout(blocks);

    let mut next_ref = Ref::new(1);
    let catalog_id = next_ref.bump();
    let tree_id = next_ref.bump();
    let regular_id = next_ref.bump();
    let bold_id = next_ref.bump();
    let info_id = next_ref.bump();
    let page_ids: Vec<(Ref, Ref)> = pages
        .iter()
        .map(|_| (next_ref.bump(), next_ref.bump()))
        .collect();

    let mut pdf = Pdf::new();
    pdf.catalog(catalog_id).pages(tree_id);
    pdf.pages(tree_id)
        .kids(page_ids.iter().map(|(page, _)| *page))
        .count(page_ids.len() as i32);
    pdf.type1_font(regular_id)
        .base_font(Name(b"Helvetica"))
        .encoding_predefined(Name(b"WinAnsiEncoding"));
    pdf.type1_font(bold_id)
        .base_font(Name(b"Helvetica-Bold"))
        .encoding_predefined(Name(b"WinAnsiEncoding"));
    pdf.document_info(info_id)
        .title(TextStr(title))
        .producer(TextStr("rxcheckout"));

    for ((page_id, content_id), content) in page_ids.into_iter().zip(pages) {
        let mut page = pdf.page(page_id);
        page.media_box(Rect::new(0.0, 0.0, PAGE_WIDTH, PAGE_HEIGHT));
        page.parent(tree_id);
        page.contents(content_id);
        page.resources()
            .fonts()
            .pair(REGULAR, regular_id)
            .pair(BOLD, bold_id);
        page.finish();
        pdf.stream(content_id, &content.finish());
    }

    pdf.finish()
}

fn format_timestamp(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%b %d, %Y %H:%M UTC").to_string())
        .unwrap_or_else(|| "Unknown date".to_string())
}

fn dollars(cents: i64) -> String {
    format!("${}", format_cents(cents))
}

fn address_blocks(blocks: &mut Vec<Block>, address: &Address) {
    if address.is_empty() {
        blocks.push(Block::Field("Address".into(), "Not provided".into()));
        return;
    }
    blocks.push(Block::Field("Address".into(), address.line1.clone()));
    if let Some(line2) = address.line2.as_ref().filter(|l| !l.is_empty()) {
        blocks.push(Block::Field(String::new(), line2.clone()));
    }
    blocks.push(Block::Field(
        String::new(),
        format!("{}, {} {}", address.city, address.state, address.zip),
    ));
}

/// Patient and order summary uploaded to the EHR after payment.
pub fn intake_summary(order: &PaidOrder) -> Vec<u8> {
    let details = &order.details;
    let customer = &details.customer;
    let mut blocks = vec![
        Block::Title("Patient Intake Summary".into()),
        Block::Text(format!("Generated for payment {}", order.payment_intent_id)),
        Block::Rule,
        Block::Heading("Patient".into()),
        Block::Field("Name".into(), customer.full_name()),
        Block::Field("Email".into(), customer.email.clone()),
        Block::Field(
            "Phone".into(),
            customer.phone.clone().unwrap_or_else(|| "Not provided".into()),
        ),
        Block::Field(
            "Date of birth".into(),
            customer.dob.clone().unwrap_or_else(|| "Not provided".into()),
        ),
    ];
    address_blocks(&mut blocks, &details.shipping);

    blocks.push(Block::Spacer);
    blocks.push(Block::Heading("Order".into()));
    match &details.selection {
        Some(selection) => {
            blocks.push(Block::Field(
                "Medication".into(),
                selection.medication.display_name().into(),
            ));
            blocks.push(Block::Field("Plan".into(), selection.plan.display_name().into()));
            let add_ons: Vec<&str> = selection
                .normalized_add_ons()
                .iter()
                .map(|a| a.display_name())
                .collect();
            blocks.push(Block::Field(
                "Add-ons".into(),
                if add_ons.is_empty() { "None".into() } else { add_ons.join(", ") },
            ));
            blocks.push(Block::Field(
                "Shipping".into(),
                selection.shipping_method.to_string(),
            ));
        }
        None => blocks.push(Block::Text("Order details unavailable.".into())),
    }
    blocks.push(Block::Field(
        "Amount paid".into(),
        format!("{} {}", dollars(order.amount_cents), order.currency.to_uppercase()),
    ));
    blocks.push(Block::Field("Paid at".into(), format_timestamp(order.paid_at)));
    if let Some(intake_id) = &details.intake_id {
        blocks.push(Block::Field("Intake reference".into(), intake_id.clone()));
    }

    render("Patient Intake Summary", &blocks)
}

/// Customer-facing invoice. Every amount comes from what the payment
/// recorded; lines without a recorded amount are listed without one.
pub fn invoice(order: &PaidOrder) -> Vec<u8> {
    let details = &order.details;
    let mut blocks = vec![
        Block::Title("Invoice".into()),
        Block::Field("Invoice for".into(), details.customer.full_name()),
        Block::Field("Email".into(), details.customer.email.clone()),
        Block::Field("Payment".into(), order.payment_intent_id.clone()),
        Block::Field("Date".into(), format_timestamp(order.paid_at)),
        Block::Rule,
    ];

    let line = |description: String, cents: Option<i64>| match cents {
        Some(cents) => Block::Amount(description, dollars(cents)),
        None => Block::Text(description),
    };

    if let Some(selection) = &details.selection {
        let lines = details.line_prices.as_ref();
        blocks.push(line(
            format!(
                "{} ({} plan)",
                selection.medication.display_name(),
                selection.plan.display_name()
            ),
            lines.map(|l| l.plan),
        ));
        for (i, add_on) in selection.normalized_add_ons().into_iter().enumerate() {
            blocks.push(line(
                add_on.display_name().into(),
                lines.and_then(|l| l.add_ons.get(i).copied()),
            ));
        }
        blocks.push(line(
            format!("Shipping ({})", selection.shipping_method),
            details.totals.map(|t| t.shipping),
        ));
    }

    blocks.push(Block::Rule);
    if let Some(totals) = &details.totals {
        blocks.push(Block::Amount("Subtotal".into(), dollars(totals.subtotal)));
        if totals.discount > 0 {
            blocks.push(Block::Amount(
                "Discount".into(),
                format!("-{}", dollars(totals.discount)),
            ));
        }
        blocks.push(Block::Amount("Shipping".into(), dollars(totals.shipping)));
    }
    blocks.push(Block::Amount(
        "Total paid".into(),
        format!("{} {}", dollars(order.amount_cents), order.currency.to_uppercase()),
    ));

    render("Invoice", &blocks)
}
