use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use koinonia_core::Money;
use koinonia_treasury::{CashBook, CashBookId, RecordExpense, TreasuryCommand};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/expenses", post(record_expense))
        .route("/entries", get(list_entries))
        .route("/balance", get(balance))
}

pub async fn record_expense(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(parish): Extension<crate::context::ParishContext>,
    Extension(recorder): Extension<crate::context::RecorderContext>,
    Json(body): Json<dto::RecordExpenseRequest>,
) -> axum::response::Response {
    let entry_date = match parse_date(&body.entry_date, "entry_date") {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let currency = match errors::parse_currency(&body.currency) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let book_agg = services.default_cash_book_id();
    let book_id = CashBookId::new(book_agg);
    let entry_id = Uuid::now_v7();

    let cmd = TreasuryCommand::RecordExpense(RecordExpense {
        parish_id: parish.parish_id(),
        book_id,
        entry_id,
        entry_date,
        amount: Money::new(body.amount_minor, currency),
        category: body.category,
        counterparty: body.counterparty,
        recorded_by: recorder.recorder_id(),
        occurred_at: Utc::now(),
    });

    if let Err(e) = services.dispatch::<CashBook>(
        parish.parish_id(),
        book_agg,
        "treasury.book",
        cmd,
        |_p, aggregate_id| CashBook::empty(CashBookId::new(aggregate_id)),
    ) {
        return errors::dispatch_error_to_response(e);
    }

    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "entry_id": entry_id.to_string() })),
    )
        .into_response()
}

pub async fn list_entries(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(parish): Extension<crate::context::ParishContext>,
    Query(query): Query<dto::PeriodQuery>,
) -> axum::response::Response {
    let (period_start, period_end) = match parse_period(&query.period_start, &query.period_end) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let items = services
        .treasury_entries(parish.parish_id(), period_start, period_end)
        .into_iter()
        .map(dto::treasury_entry_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn balance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(parish): Extension<crate::context::ParishContext>,
    Query(query): Query<dto::PeriodQuery>,
) -> axum::response::Response {
    let (period_start, period_end) = match parse_period(&query.period_start, &query.period_end) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let balances = services.treasury_balance(parish.parish_id(), period_start, period_end);

    let by_currency = balances
        .into_iter()
        .map(|(currency, b)| {
            (
                currency.code().to_string(),
                serde_json::json!({
                    "income": b.income_minor,
                    "expense": b.expense_minor,
                    "balance": b.balance_minor(),
                }),
            )
        })
        .collect::<serde_json::Map<_, _>>();

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "period_start": period_start.to_string(),
            "period_end": period_end.to_string(),
            "balances": by_currency,
        })),
    )
        .into_response()
}

fn parse_period(
    start: &str,
    end: &str,
) -> Result<(NaiveDate, NaiveDate), axum::response::Response> {
    let period_start = parse_date(start, "period_start")?;
    let period_end = parse_date(end, "period_end")?;
    if period_end < period_start {
        return Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "period_end must not precede period_start",
        ));
    }
    Ok((period_start, period_end))
}

fn parse_date(raw: &str, field: &str) -> Result<NaiveDate, axum::response::Response> {
    raw.parse::<NaiveDate>().map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            format!("{field} must be an ISO date (YYYY-MM-DD)"),
        )
    })
}
