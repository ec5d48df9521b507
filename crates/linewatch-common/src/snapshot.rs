//! Fixed metric schema, full snapshots and partial patches.
//!
//! The backend speaks in camelCase Vietnamese column names (`slth`, `ldCoMat`,
//! `phanTramHt`, ...). Each metric is declared once in [`metric_schema!`] and
//! gets an English field on [`Snapshot`] and [`SnapshotPatch`], a
//! [`MetricField`] variant, a display label and a [`FieldKind`].
//!
//! | Kind         | Storage  | Formatting                     |
//! |--------------|----------|--------------------------------|
//! | `Text`       | `String` | as-is                          |
//! | `Count`      | `f64`    | thousands grouping             |
//! | `Percentage` | `f64`    | `95.5%`, coloured by bucket    |
//! | `Delta`      | `f64`    | signed, `+12` / `-3` / `0`     |
//! | `Ratio`      | `f64`    | two decimals                   |
//! | `Decimal`    | `f64`    | two decimals                   |
//!
//! Numeric fields default to `0` when the backend omits them; text fields
//! default to empty.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hourly::HourlyData;

/// Semantic kind of a metric, used to pick a formatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Text,
    Count,
    Percentage,
    Delta,
    Ratio,
    Decimal,
}

/// Borrowed value of a single metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Text(&'a str),
    Number(f64),
}

impl FieldValue<'_> {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }
}

macro_rules! metric_schema {
    (
        text {
            $( $t_field:ident => $t_wire:literal as $t_variant:ident, $t_label:literal; )*
        }
        numeric {
            $( $n_field:ident => $n_wire:literal as $n_variant:ident : $n_kind:ident, $n_label:literal; )*
        }
    ) => {
        /// Every metric a display knows about.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum MetricField {
            $( $t_variant, )*
            $( $n_variant, )*
        }

        impl MetricField {
            pub const ALL: &'static [MetricField] = &[
                $( MetricField::$t_variant, )*
                $( MetricField::$n_variant, )*
            ];

            /// Backend column name.
            pub fn wire_name(&self) -> &'static str {
                match self {
                    $( Self::$t_variant => $t_wire, )*
                    $( Self::$n_variant => $n_wire, )*
                }
            }

            pub fn label(&self) -> &'static str {
                match self {
                    $( Self::$t_variant => $t_label, )*
                    $( Self::$n_variant => $n_label, )*
                }
            }

            pub fn kind(&self) -> FieldKind {
                match self {
                    $( Self::$t_variant => FieldKind::Text, )*
                    $( Self::$n_variant => FieldKind::$n_kind, )*
                }
            }

            pub fn from_wire(name: &str) -> Option<Self> {
                Self::ALL.iter().copied().find(|f| f.wire_name() == name)
            }
        }

        /// Current values shown by one display.
        #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
        pub struct Snapshot {
            $(
                #[serde(rename = $t_wire, default, deserialize_with = "crate::lenient::text")]
                pub $t_field: String,
            )*
            $(
                #[serde(rename = $n_wire, default, deserialize_with = "crate::lenient::number")]
                pub $n_field: f64,
            )*
            #[serde(rename = "hourlyData", default)]
            pub hourly: HourlyData,
        }

        /// Partial update. `None` means "not carried by this update".
        #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
        pub struct SnapshotPatch {
            $(
                #[serde(
                    rename = $t_wire,
                    default,
                    deserialize_with = "crate::lenient::opt_text",
                    skip_serializing_if = "Option::is_none"
                )]
                pub $t_field: Option<String>,
            )*
            $(
                #[serde(
                    rename = $n_wire,
                    default,
                    deserialize_with = "crate::lenient::opt_number",
                    skip_serializing_if = "Option::is_none"
                )]
                pub $n_field: Option<f64>,
            )*
            #[serde(rename = "hourlyData", default, skip_serializing_if = "Option::is_none")]
            pub hourly: Option<HourlyData>,
        }

        impl Snapshot {
            pub fn field(&self, field: MetricField) -> FieldValue<'_> {
                match field {
                    $( MetricField::$t_variant => FieldValue::Text(&self.$t_field), )*
                    $( MetricField::$n_variant => FieldValue::Number(self.$n_field), )*
                }
            }

            /// Shallow merge: every field the patch carries replaces the
            /// current value, everything else is left alone. Hourly data is
            /// replaced as a whole structure.
            pub fn merge(&mut self, patch: &SnapshotPatch) {
                $(
                    if let Some(v) = &patch.$t_field {
                        self.$t_field.clone_from(v);
                    }
                )*
                $(
                    if let Some(v) = patch.$n_field {
                        self.$n_field = v;
                    }
                )*
                if let Some(hourly) = &patch.hourly {
                    self.hourly.clone_from(hourly);
                }
            }
        }

        impl SnapshotPatch {
            /// Metrics this patch carries, in schema order.
            pub fn touched(&self) -> Vec<MetricField> {
                let mut fields = Vec::new();
                $(
                    if self.$t_field.is_some() {
                        fields.push(MetricField::$t_variant);
                    }
                )*
                $(
                    if self.$n_field.is_some() {
                        fields.push(MetricField::$n_variant);
                    }
                )*
                fields
            }

            pub fn is_empty(&self) -> bool {
                self.touched().is_empty() && self.hourly.is_none()
            }
        }

        impl From<Snapshot> for SnapshotPatch {
            fn from(s: Snapshot) -> Self {
                Self {
                    $( $t_field: Some(s.$t_field), )*
                    $( $n_field: Some(s.$n_field), )*
                    hourly: Some(s.hourly),
                }
            }
        }
    };
}

metric_schema! {
    text {
        line_code => "maChuyenLine" as LineCode, "Line code";
        factory => "nhaMay" as Factory, "Factory";
        line => "line" as Line, "Line";
        team => "to" as Team, "Team";
        product_code => "maHang" as ProductCode, "Product";
        manager => "canBoQuanLy" as Manager, "Manager";
        lean => "lean" as Lean, "Lean";
    }
    numeric {
        output_today => "slth" as OutputToday: Count, "Output today";
        planned_labor => "congKh" as PlannedLabor: Decimal, "Planned labor";
        actual_labor => "congTh" as ActualLabor: Decimal, "Actual labor";
        production_hours => "gioSx" as ProductionHours: Decimal, "Production hours";
        working_time => "thoigianlamviec" as WorkingTime: Decimal, "Working time";
        staff_present => "ldCoMat" as StaffPresent: Count, "Staff present";
        staff_layout => "ldLayout" as StaffLayout: Count, "Staff layout";
        staff_current => "ldHienCo" as StaffCurrent: Count, "Staff on roll";
        diff_staff_layout => "diffLdCoMatLayout" as DiffStaffLayout: Delta, "Present vs layout";
        productivity => "nangSuat" as Productivity: Decimal, "Productivity";
        daily_target => "targetNgay" as DailyTarget: Count, "Daily target";
        hourly_target => "targetGio" as HourlyTarget: Count, "Hourly target";
        avg_hourly_target => "bqTargetGio" as AvgHourlyTarget: Count, "Avg target/hour";
        cumulative_plan => "lkkh" as CumulativePlan: Count, "Cumulative plan";
        cumulative_actual => "lkth" as CumulativeActual: Count, "Cumulative actual";
        diff_cumulative_target => "diffLkthTarget" as DiffCumulativeTarget: Delta, "Actual vs target";
        completion_pct => "phanTramHt" as CompletionPct: Percentage, "Completion";
        diff_completion_100 => "diffPhanTramHt100" as DiffCompletion100: Delta, "Completion vs 100%";
        remaining_qty => "slcl" as RemainingQty: Count, "Remaining";
        diff_avg_target_remaining => "diffBqTargetSlcl" as DiffAvgTargetRemaining: Delta, "Avg target vs remaining";
        pph_plan => "pphKh" as PphPlan: Decimal, "PPH plan";
        pph_actual => "pphTh" as PphActual: Decimal, "PPH actual";
        pph_target => "pphTarget" as PphTarget: Decimal, "PPH target";
        pph_assigned => "pphGiao" as PphAssigned: Decimal, "PPH assigned";
        pph_completion_pct => "phanTramHtPph" as PphCompletionPct: Percentage, "PPH completion";
        diff_pph_completion_100 => "diffPhanTramHtPph100" as DiffPphCompletion100: Delta, "PPH vs 100%";
        ratio_pph => "ratioPphThKh" as RatioPph: Ratio, "PPH actual/plan";
        assigned_pct => "phanTramGiao" as AssignedPct: Percentage, "Assigned";
        takt => "nhipsx" as Takt: Decimal, "Takt";
        frequency => "tansuat" as Frequency: Decimal, "Frequency";
        inspected_total => "tongKiem" as InspectedTotal: Count, "Inspected";
        first_pass => "datLan1" as FirstPass: Count, "First pass";
        passed_total => "tongDat" as PassedTotal: Count, "Passed";
        defect_total => "tongLoi" as DefectTotal: Count, "Defects";
        rft => "rft" as Rft: Percentage, "RFT";
        rft_target => "mucTieuRft" as RftTarget: Percentage, "RFT target";
        diff_rft_target => "diffRftTarget" as DiffRftTarget: Delta, "RFT vs target";
        defect_rate => "tyleloi" as DefectRate: Percentage, "Defect rate";
        qc_target => "QCTarget" as QcTarget: Percentage, "QC target";
        rework_bags => "tuiChuaTaiChe" as ReworkBags: Count, "Bags awaiting rework";
        cumulative_defect_bags => "lktuiloi" as CumulativeDefectBags: Count, "Cumulative defect bags";
    }
}

impl Snapshot {
    /// Best available running output figure: cumulative actual when
    /// reported, otherwise today's output.
    pub fn cumulative_output(&self) -> f64 {
        if self.cumulative_actual != 0.0 {
            self.cumulative_actual
        } else {
            self.output_today
        }
    }

    pub fn has_line_code(&self) -> bool {
        !self.line_code.trim().is_empty()
    }
}

impl SnapshotPatch {
    pub fn from_json(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hourly::TimeSlot;
    use serde_json::json;

    #[test]
    fn test_wire_names_are_unique() {
        let mut names: Vec<&str> = MetricField::ALL.iter().map(|f| f.wire_name()).collect();
        names.sort();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
    }

    #[test]
    fn test_from_wire_round_trips_every_field() {
        for field in MetricField::ALL {
            assert_eq!(MetricField::from_wire(field.wire_name()), Some(*field));
        }
        assert_eq!(MetricField::from_wire("nope"), None);
    }

    #[test]
    fn test_missing_numbers_default_to_zero() {
        let snap: Snapshot = serde_json::from_value(json!({"maChuyenLine": "L01"})).unwrap();
        assert_eq!(snap.line_code, "L01");
        assert_eq!(snap.output_today, 0.0);
        assert_eq!(snap.field(MetricField::Rft), FieldValue::Number(0.0));
        assert!(snap.hourly.is_empty());
    }

    #[test]
    fn test_lenient_values_are_accepted() {
        let snap: Snapshot = serde_json::from_value(json!({
            "slth": "1.200",
            "rft": "93.5%",
            "to": 2,
            "ldCoMat": null
        }))
        .unwrap();
        assert_eq!(snap.output_today, 1.2);
        assert_eq!(snap.rft, 93.5);
        assert_eq!(snap.team, "2");
        assert_eq!(snap.staff_present, 0.0);
    }

    #[test]
    fn test_malformed_numeric_text_decodes_its_leading_number() {
        let snap: Snapshot = serde_json::from_value(json!({"rft": "12.5.1", "slth": "40-2"})).unwrap();
        assert_eq!(snap.rft, 12.5);
        assert_eq!(snap.output_today, 40.0);
        let patch = SnapshotPatch::from_json(&json!({"rft": "97.5.0"})).unwrap();
        let mut merged = snap.clone();
        merged.merge(&patch);
        assert_eq!(merged.rft, 97.5);
    }

    #[test]
    fn test_merge_leaves_untouched_fields_alone() {
        let mut snap = Snapshot {
            line_code: "L01".into(),
            output_today: 100.0,
            staff_present: 30.0,
            ..Default::default()
        };
        let patch = SnapshotPatch::from_json(&json!({"slth": 150, "ldCoMat": null})).unwrap();
        snap.merge(&patch);
        assert_eq!(snap.output_today, 150.0);
        assert_eq!(snap.staff_present, 30.0);
        assert_eq!(snap.line_code, "L01");
    }

    #[test]
    fn test_merge_replaces_hourly_as_a_whole() {
        let mut snap: Snapshot = serde_json::from_value(json!({
            "hourlyData": {"hourly": {"h830": {"sanluong": 10}, "h930": {"sanluong": 20}}}
        }))
        .unwrap();
        let patch = SnapshotPatch::from_json(&json!({
            "hourlyData": {"hourly": {"h930": {"sanluong": 25}}}
        }))
        .unwrap();
        snap.merge(&patch);
        assert_eq!(snap.hourly.hourly.len(), 1);
        assert_eq!(snap.hourly.slot(TimeSlot::H0930).unwrap().quantity, 25.0);
    }

    #[test]
    fn test_touched_lists_carried_fields() {
        let patch = SnapshotPatch::from_json(&json!({"slth": 1, "rft": 90, "other": 3})).unwrap();
        assert_eq!(patch.touched(), vec![MetricField::OutputToday, MetricField::Rft]);
        assert!(!patch.is_empty());
        assert!(SnapshotPatch::default().is_empty());
    }

    #[test]
    fn test_cumulative_output_falls_back_to_today() {
        let mut snap = Snapshot {
            output_today: 40.0,
            ..Default::default()
        };
        assert_eq!(snap.cumulative_output(), 40.0);
        snap.cumulative_actual = 55.0;
        assert_eq!(snap.cumulative_output(), 55.0);
    }

    #[test]
    fn test_kinds_match_formatting_intent() {
        assert_eq!(MetricField::LineCode.kind(), FieldKind::Text);
        assert_eq!(MetricField::CompletionPct.kind(), FieldKind::Percentage);
        assert_eq!(MetricField::DiffCumulativeTarget.kind(), FieldKind::Delta);
        assert_eq!(MetricField::OutputToday.kind(), FieldKind::Count);
    }
}
