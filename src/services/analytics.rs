use chrono::{Days, Duration, NaiveDate};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{Booking, Property};

/// Monthly costs are charged linearly: a 90-day window carries 3 months.
const DAYS_PER_MONTH: u32 = 30;
const SERIES_LABEL_FORMAT: &str = "%d/%m";

/// N calendar days ending on `end` (inclusive), plus the N days before it
/// used for growth comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportingPeriod {
    days: u32,
    start: NaiveDate,
    end: NaiveDate,
    previous_start: NaiveDate,
}

impl ReportingPeriod {
    /// `None` for an empty period or one reaching past the calendar range.
    pub fn new(days: u32, end: NaiveDate) -> Option<Self> {
        if days == 0 {
            return None;
        }
        let start = end.checked_sub_days(Days::new(u64::from(days) - 1))?;
        let previous_start = start.checked_sub_days(Days::new(u64::from(days)))?;
        Some(Self {
            days,
            start,
            end,
            previous_start,
        })
    }

    pub fn days(&self) -> u32 {
        self.days
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn previous_start(&self) -> NaiveDate {
        self.previous_start
    }

    pub fn previous_end(&self) -> NaiveDate {
        // previous_start <= start - 1 day, so this stays in range.
        self.start.pred_opt().unwrap_or(self.previous_start)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Buckets are keyed by calendar date, not by their `dd/mm` label: a
    /// window longer than a year keeps both 31/12 days apart and always has
    /// exactly `days` buckets.
    fn bucket_index(&self, date: NaiveDate) -> Option<usize> {
        if !self.contains(date) {
            return None;
        }
        usize::try_from((date - self.start).num_days()).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardMetrics {
    pub revenue: f64,
    pub sales_growth_percent: f64,
    pub fixed_costs: f64,
    pub marketing_fixed_costs: f64,
    pub variable_costs: f64,
    pub total_costs: f64,
    pub profit: f64,
    pub marketing_cost: f64,
    pub cpa: f64,
    pub average_ticket: f64,
    pub booking_count: u64,
    pub total_nights_booked: i64,
    pub available_nights: u64,
    pub occupancy_rate: f64,
    pub revpar: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub label: String,
    pub revenue: f64,
    pub booking_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overview {
    pub metrics: DashboardMetrics,
    pub series: Vec<SeriesPoint>,
}

/// Turns the bookings checked in during `period` (and during the window
/// before it) into dashboard KPIs. Cancelled bookings are ignored. Callers
/// are expected to pass only bookings whose check-in falls in the matching
/// window; nights are never clipped to the window.
pub fn aggregate(
    bookings: &[Booking],
    previous_bookings: &[Booking],
    properties: &[Property],
    period: &ReportingPeriod,
) -> Overview {
    let current = bookings
        .iter()
        .filter(|booking| !booking.is_cancelled())
        .collect::<Vec<_>>();
    let previous = previous_bookings
        .iter()
        .filter(|booking| !booking.is_cancelled());

    // Money is summed in decimal so every total matches the series buckets.
    let revenue = sum(current.iter().map(|booking| booking.gross_value));
    let previous_revenue = sum(previous.map(|booking| booking.gross_value));
    let sales_growth_percent = growth_percent(to_f64(revenue), to_f64(previous_revenue));

    let fixed_costs = prorate(
        sum(properties
            .iter()
            .map(|property| property.fixed_cost_monthly.unwrap_or(0.0))),
        period,
    );
    let marketing_fixed_costs = prorate(
        sum(properties
            .iter()
            .map(|property| property.marketing_invest_monthly.unwrap_or(0.0))),
        period,
    );
    let variable_costs = sum(
        current
            .iter()
            .flat_map(|booking| [booking.channel_fee_value, booking.ad_cost]),
    );
    let total_costs = fixed_costs
        .saturating_add(marketing_fixed_costs)
        .saturating_add(variable_costs);
    let profit = revenue.saturating_sub(total_costs);

    let marketing_cost =
        sum(current.iter().map(|booking| booking.ad_cost)).saturating_add(marketing_fixed_costs);
    let booking_count = current.len() as u64;
    let cpa = ratio(marketing_cost, Decimal::from(booking_count));
    let average_ticket = ratio(revenue, Decimal::from(booking_count));

    let total_nights_booked = current.iter().map(|booking| booking.nights()).sum::<i64>();
    let units = properties
        .iter()
        .map(|property| u64::from(property.capacity))
        .sum::<u64>();
    let available_nights = units * u64::from(period.days());
    let occupancy_rate = if available_nights > 0 {
        total_nights_booked as f64 / available_nights as f64 * 100.0
    } else {
        0.0
    };
    let revpar = ratio(revenue, Decimal::from(available_nights));

    let metrics = DashboardMetrics {
        revenue: to_f64(revenue),
        sales_growth_percent: clean(sales_growth_percent),
        fixed_costs: to_f64(fixed_costs),
        marketing_fixed_costs: to_f64(marketing_fixed_costs),
        variable_costs: to_f64(variable_costs),
        total_costs: to_f64(total_costs),
        profit: to_f64(profit),
        marketing_cost: to_f64(marketing_cost),
        cpa: to_f64(cpa),
        average_ticket: to_f64(average_ticket),
        booking_count,
        total_nights_booked,
        available_nights,
        occupancy_rate: clean(occupancy_rate),
        revpar: to_f64(revpar),
    };

    Overview {
        metrics,
        series: daily_series(&current, period),
    }
}

/// Growth against the previous window. With no previous revenue, any new
/// revenue reads as +100%.
pub fn growth_percent(revenue: f64, previous_revenue: f64) -> f64 {
    if previous_revenue > 0.0 {
        (revenue - previous_revenue) / previous_revenue * 100.0
    } else if revenue > 0.0 {
        100.0
    } else {
        0.0
    }
}

fn daily_series(bookings: &[&Booking], period: &ReportingPeriod) -> Vec<SeriesPoint> {
    let days = usize::try_from(period.days()).unwrap_or_default();
    let mut totals = vec![(Decimal::ZERO, 0u64); days];
    for booking in bookings {
        let Some((revenue, count)) = period
            .bucket_index(booking.check_in_date)
            .and_then(|index| totals.get_mut(index))
        else {
            continue;
        };
        *revenue = revenue.saturating_add(to_decimal(booking.gross_value));
        *count += 1;
    }

    let start = period.start();
    totals
        .into_iter()
        .enumerate()
        .map(|(offset, (revenue, booking_count))| {
            let date = start + Duration::days(offset as i64);
            SeriesPoint {
                date,
                label: date.format(SERIES_LABEL_FORMAT).to_string(),
                revenue: to_f64(revenue),
                booking_count,
            }
        })
        .collect()
}

fn sum(values: impl Iterator<Item = f64>) -> Decimal {
    values.fold(Decimal::ZERO, |total, value| {
        total.saturating_add(to_decimal(value))
    })
}

/// Monthly amount charged over the period's days.
fn prorate(monthly: Decimal, period: &ReportingPeriod) -> Decimal {
    monthly.saturating_mul(Decimal::from(period.days())) / Decimal::from(DAYS_PER_MONTH)
}

fn ratio(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator.is_zero() {
        return Decimal::ZERO;
    }
    numerator.checked_div(denominator).unwrap_or_default()
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

fn to_f64(value: Decimal) -> f64 {
    clean(value.to_f64().unwrap_or_default())
}

/// Normalizes negative zero and non-finite values to plain zero.
fn clean(value: f64) -> f64 {
    if value == 0.0 || !value.is_finite() {
        0.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::{aggregate, growth_percent, ReportingPeriod};
    use crate::models::{Booking, BookingChannel, BookingStatus, Property, PropertyCategory};
    use chrono::NaiveDate;

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid date")
    }

    fn booking(id: &str, check_in: &str, check_out: &str, gross_value: f64) -> Booking {
        Booking {
            id: id.to_string(),
            owner_id: "owner".to_string(),
            property_id: "p1".to_string(),
            guest_name: "Guest".to_string(),
            check_in_date: date(check_in),
            check_out_date: date(check_out),
            gross_value,
            channel: BookingChannel::Direct,
            channel_fee_value: 0.0,
            ad_cost: 0.0,
            status: BookingStatus::Confirmed,
            tags: Vec::new(),
            notes: None,
        }
    }

    fn property(id: &str, fixed: Option<f64>, marketing: Option<f64>) -> Property {
        Property {
            id: id.to_string(),
            owner_id: "owner".to_string(),
            name: format!("Property {id}"),
            category: PropertyCategory::Cabin,
            city: None,
            state: None,
            average_daily_rate: None,
            fixed_cost_monthly: fixed,
            marketing_invest_monthly: marketing,
            photo_url: None,
            capacity: 1,
        }
    }

    fn period(days: u32, end: &str) -> ReportingPeriod {
        ReportingPeriod::new(days, date(end)).expect("positive period")
    }

    #[test]
    fn empty_inputs_yield_plain_zeros() {
        let overview = aggregate(&[], &[], &[], &period(30, "2024-01-31"));
        let metrics = &overview.metrics;
        for value in [
            metrics.revenue,
            metrics.sales_growth_percent,
            metrics.fixed_costs,
            metrics.marketing_fixed_costs,
            metrics.variable_costs,
            metrics.total_costs,
            metrics.profit,
            metrics.marketing_cost,
            metrics.cpa,
            metrics.average_ticket,
            metrics.occupancy_rate,
            metrics.revpar,
        ] {
            assert_eq!(value, 0.0);
            assert!(value.is_sign_positive(), "negative zero leaked: {value}");
        }
        assert_eq!(metrics.booking_count, 0);
        assert_eq!(metrics.total_nights_booked, 0);
        assert_eq!(metrics.available_nights, 0);
        assert_eq!(overview.series.len(), 30);
    }

    #[test]
    fn growth_rules() {
        assert_eq!(growth_percent(500.0, 0.0), 100.0);
        assert_eq!(growth_percent(0.0, 0.0), 0.0);
        assert_eq!(growth_percent(1500.0, 1000.0), 50.0);
        assert_eq!(growth_percent(0.0, 400.0), -100.0);
    }

    #[test]
    fn growth_uses_previous_window_bookings() {
        let current = vec![booking("c1", "2024-01-20", "2024-01-22", 500.0)];
        let mut cancelled = booking("p1", "2023-12-20", "2023-12-22", 800.0);
        cancelled.status = BookingStatus::Cancelled;
        let overview = aggregate(&current, &[cancelled], &[], &period(30, "2024-01-31"));
        assert_eq!(overview.metrics.sales_growth_percent, 100.0);
    }

    #[test]
    fn fixed_costs_scale_linearly_with_period() {
        let properties = vec![property("p1", Some(3000.0), None)];
        let month = aggregate(&[], &[], &properties, &period(30, "2024-01-31"));
        let quarter = aggregate(&[], &[], &properties, &period(90, "2024-01-31"));
        assert_eq!(month.metrics.fixed_costs, 3000.0);
        assert_eq!(quarter.metrics.fixed_costs, 9000.0);
        assert_eq!(quarter.metrics.profit, -9000.0);
    }

    #[test]
    fn cancelled_bookings_are_excluded() {
        let mut cancelled = booking("b3", "2024-01-12", "2024-01-14", 5000.0);
        cancelled.status = BookingStatus::Cancelled;
        let bookings = vec![
            booking("b1", "2024-01-10", "2024-01-12", 1000.0),
            booking("b2", "2024-01-15", "2024-01-16", 1500.0),
            cancelled,
        ];
        let overview = aggregate(&bookings, &[], &[], &period(30, "2024-01-31"));
        assert_eq!(overview.metrics.revenue, 2500.0);
        assert_eq!(overview.metrics.booking_count, 2);
        assert_eq!(overview.metrics.average_ticket, 1250.0);
    }

    #[test]
    fn counts_whole_nights_without_clipping() {
        let bookings = vec![booking("b1", "2024-01-10", "2024-01-13", 300.0)];
        let overview = aggregate(&bookings, &[], &[], &period(30, "2024-01-31"));
        assert_eq!(overview.metrics.total_nights_booked, 3);

        let spills_past_end = vec![booking("b2", "2024-01-30", "2024-02-04", 500.0)];
        let overview = aggregate(&spills_past_end, &[], &[], &period(30, "2024-01-31"));
        assert_eq!(overview.metrics.total_nights_booked, 5);
    }

    #[test]
    fn occupancy_and_revpar_use_available_nights() {
        let properties = vec![property("p1", None, None), property("p2", None, None)];
        let bookings = (0..10)
            .map(|index| {
                let check_in = format!("2024-01-{:02}", index * 3 + 1);
                let check_out = format!("2024-01-{:02}", index * 3 + 4);
                booking(&format!("b{index}"), &check_in, &check_out, 600.0)
            })
            .collect::<Vec<_>>();
        let overview = aggregate(&bookings, &[], &properties, &period(30, "2024-01-30"));
        assert_eq!(overview.metrics.available_nights, 60);
        assert_eq!(overview.metrics.total_nights_booked, 30);
        assert_eq!(overview.metrics.occupancy_rate, 50.0);
        assert_eq!(overview.metrics.revpar, 100.0);
    }

    #[test]
    fn capacity_multiplies_available_nights() {
        let mut hotel = property("h1", None, None);
        hotel.capacity = 12;
        let overview = aggregate(&[], &[], &[hotel], &period(7, "2024-01-31"));
        assert_eq!(overview.metrics.available_nights, 84);
    }

    #[test]
    fn cpa_and_ticket_are_zero_without_bookings() {
        let properties = vec![property("p1", Some(1000.0), Some(600.0))];
        let overview = aggregate(&[], &[], &properties, &period(30, "2024-01-31"));
        assert_eq!(overview.metrics.marketing_cost, 600.0);
        assert_eq!(overview.metrics.cpa, 0.0);
        assert_eq!(overview.metrics.average_ticket, 0.0);
    }

    #[test]
    fn costs_profit_and_cpa() {
        let properties = vec![property("p1", Some(1500.0), Some(300.0))];
        let mut first = booking("b1", "2024-01-05", "2024-01-07", 1200.0);
        first.channel_fee_value = 180.0;
        first.ad_cost = 40.0;
        let mut second = booking("b2", "2024-01-20", "2024-01-21", 800.0);
        second.ad_cost = 60.0;

        let overview = aggregate(&[first, second], &[], &properties, &period(30, "2024-01-31"));
        let metrics = overview.metrics;
        assert_eq!(metrics.variable_costs, 280.0);
        assert_eq!(metrics.total_costs, 2080.0);
        assert_eq!(metrics.profit, -80.0);
        assert_eq!(metrics.marketing_cost, 400.0);
        assert_eq!(metrics.cpa, 200.0);
    }

    #[test]
    fn series_is_chronological_and_sums_to_revenue() {
        let bookings = vec![
            booking("b1", "2024-01-31", "2024-02-02", 700.0),
            booking("b2", "2024-01-25", "2024-01-26", 300.0),
            booking("b3", "2024-01-25", "2024-01-27", 250.0),
        ];
        let overview = aggregate(&bookings, &[], &[], &period(7, "2024-01-31"));
        let series = &overview.series;

        assert_eq!(series.len(), 7);
        assert!(series.windows(2).all(|pair| pair[0].date < pair[1].date));
        assert_eq!(series[0].label, "25/01");
        assert_eq!(series[6].label, "31/01");
        assert_eq!(series[0].revenue, 550.0);
        assert_eq!(series[0].booking_count, 2);

        let bucket_total = series.iter().map(|point| point.revenue).sum::<f64>();
        assert_eq!(bucket_total, overview.metrics.revenue);
    }

    #[test]
    fn cent_amounts_add_up_exactly() {
        let bookings = vec![
            booking("b1", "2024-01-25", "2024-01-26", 0.1),
            booking("b2", "2024-01-26", "2024-01-27", 0.2),
            booking("b3", "2024-01-26", "2024-01-28", 0.3),
        ];
        let overview = aggregate(&bookings, &[], &[], &period(7, "2024-01-31"));

        assert_eq!(overview.metrics.revenue, 0.6);
        assert_eq!(overview.series[0].revenue, 0.1);
        assert_eq!(overview.series[1].revenue, 0.5);
        let bucket_total = overview
            .series
            .iter()
            .fold(0.0, |total, point| total + point.revenue);
        assert_eq!(bucket_total, overview.metrics.revenue);
        assert_eq!(overview.metrics.average_ticket, 0.2);
    }

    #[test]
    fn periods_beyond_the_calendar_are_rejected() {
        assert!(ReportingPeriod::new(100_000_000, date("2024-01-31")).is_none());
        assert!(ReportingPeriod::new(u32::MAX, date("2024-01-31")).is_none());

        let long = ReportingPeriod::new(36_600, date("2024-01-31")).expect("in range");
        assert_eq!(long.previous_end() + chrono::Duration::days(1), long.start());
    }

    #[test]
    fn series_keeps_dates_across_year_boundary_apart() {
        let bookings = vec![booking("b1", "2023-12-31", "2024-01-02", 100.0)];
        let overview = aggregate(&bookings, &[], &[], &period(400, "2024-12-31"));
        let matches = overview
            .series
            .iter()
            .filter(|point| point.label == "31/12")
            .collect::<Vec<_>>();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].revenue, 100.0);
        assert_eq!(matches[1].revenue, 0.0);
    }

    #[test]
    fn period_windows_are_adjacent() {
        let window = period(30, "2024-03-31");
        assert_eq!(window.start(), date("2024-03-02"));
        assert_eq!(window.previous_end(), date("2024-03-01"));
        assert_eq!(window.previous_start(), date("2024-02-01"));
        assert!(ReportingPeriod::new(0, date("2024-03-31")).is_none());
    }
}
