//! Persistence boundary: doctors/patients/appointments/insurance.
//!
//! The wire contract is a narrow read/write trait; concrete storage is an
//! external collaborator. A `rusqlite`-backed implementation ships as the
//! reference, alongside an in-memory one for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub id: String,
    pub name: String,
    pub specialty: String,
    pub department: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub phone: String,
    pub name: Option<String>,
    pub national_id_last4: Option<String>,
    pub gender: Option<String>,
    pub insurance_company: Option<String>,
    pub insurance_id: Option<String>,
    pub language: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub patient_phone: String,
    pub doctor_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub booked_via_call: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsuranceRow {
    pub company: String,
    pub covered_departments: Vec<String>,
}

/// Rewrites a local `05…` number into the `+966…` form used as the
/// lookup/insert key everywhere in the repository.
pub fn normalize_phone(phone: &str) -> String {
    if let Some(rest) = phone.strip_prefix("05") {
        format!("+966{rest}")
    } else {
        phone.to_string()
    }
}

/// Read/write persistence boundary. Snapshots are read-only; writes are
/// the only way to mutate patient/appointment state.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn list_doctors(&self) -> anyhow::Result<Vec<Doctor>>;
    async fn list_insurance(&self) -> anyhow::Result<Vec<InsuranceRow>>;
    async fn todays_appointments(&self, phone: &str) -> anyhow::Result<Vec<Appointment>>;

    async fn upsert_patient(&self, patient: Patient) -> anyhow::Result<Patient>;
    async fn create_appointment(&self, appointment: Appointment) -> anyhow::Result<Appointment>;
    async fn cancel_appointment(&self, id: &str, reason: Option<&str>) -> anyhow::Result<bool>;
    async fn confirm_appointment(&self, id: &str) -> anyhow::Result<bool>;
}

/// In-memory reference implementation, used by tests and a
/// storage-less local run.
#[derive(Default)]
pub struct InMemoryRepository {
    doctors: Vec<Doctor>,
    insurance: Vec<InsuranceRow>,
    patients: Mutex<HashMap<String, Patient>>,
    appointments: Mutex<HashMap<String, Appointment>>,
}

impl InMemoryRepository {
    pub fn new(doctors: Vec<Doctor>, insurance: Vec<InsuranceRow>) -> Self {
        Self {
            doctors,
            insurance,
            patients: Mutex::new(HashMap::new()),
            appointments: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn list_doctors(&self) -> anyhow::Result<Vec<Doctor>> {
        Ok(self.doctors.clone())
    }

    async fn list_insurance(&self) -> anyhow::Result<Vec<InsuranceRow>> {
        Ok(self.insurance.clone())
    }

    async fn todays_appointments(&self, phone: &str) -> anyhow::Result<Vec<Appointment>> {
        let phone = normalize_phone(phone);
        let today = Utc::now().date_naive();
        let appointments = self.appointments.lock().await;
        Ok(appointments
            .values()
            .filter(|a| a.patient_phone == phone && a.scheduled_at.date_naive() == today)
            .cloned()
            .collect())
    }

    async fn upsert_patient(&self, mut patient: Patient) -> anyhow::Result<Patient> {
        patient.phone = normalize_phone(&patient.phone);
        let mut patients = self.patients.lock().await;
        patients.insert(patient.phone.clone(), patient.clone());
        Ok(patient)
    }

    async fn create_appointment(&self, mut appointment: Appointment) -> anyhow::Result<Appointment> {
        appointment.patient_phone = normalize_phone(&appointment.patient_phone);
        let mut appointments = self.appointments.lock().await;
        appointments.insert(appointment.id.clone(), appointment.clone());
        Ok(appointment)
    }

    async fn cancel_appointment(&self, id: &str, reason: Option<&str>) -> anyhow::Result<bool> {
        let mut appointments = self.appointments.lock().await;
        if let Some(appt) = appointments.get_mut(id) {
            if appt.status != AppointmentStatus::Completed {
                appt.status = AppointmentStatus::Cancelled;
                if let Some(reason) = reason {
                    appt.notes = Some(reason.to_string());
                }
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn confirm_appointment(&self, id: &str) -> anyhow::Result<bool> {
        let mut appointments = self.appointments.lock().await;
        if let Some(appt) = appointments.get_mut(id) {
            if appt.status == AppointmentStatus::Pending {
                appt.status = AppointmentStatus::Confirmed;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// `rusqlite`-backed reference implementation.
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    pub async fn new<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::init_schema(&conn)?;
        info!(path = %path.display(), "opened repository database");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> anyhow::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS doctors (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                specialty TEXT NOT NULL,
                department TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS insurance (
                company TEXT PRIMARY KEY,
                covered_departments TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS patients (
                phone TEXT PRIMARY KEY,
                name TEXT,
                national_id_last4 TEXT,
                gender TEXT,
                insurance_company TEXT,
                insurance_id TEXT,
                language TEXT NOT NULL DEFAULT 'ar'
            );

            CREATE TABLE IF NOT EXISTS appointments (
                id TEXT PRIMARY KEY,
                patient_phone TEXT NOT NULL,
                doctor_id TEXT NOT NULL,
                scheduled_at TEXT NOT NULL,
                duration_minutes INTEGER NOT NULL,
                status TEXT NOT NULL,
                notes TEXT,
                booked_via_call INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_appointments_phone ON appointments(patient_phone);
            "#,
        )?;
        Ok(())
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn list_doctors(&self) -> anyhow::Result<Vec<Doctor>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached("SELECT id, name, specialty, department FROM doctors")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Doctor {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    specialty: row.get(2)?,
                    department: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn list_insurance(&self) -> anyhow::Result<Vec<InsuranceRow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached("SELECT company, covered_departments FROM insurance")?;
        let rows = stmt
            .query_map([], |row| {
                let company: String = row.get(0)?;
                let departments_json: String = row.get(1)?;
                Ok((company, departments_json))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|(company, departments_json)| InsuranceRow {
                company,
                covered_departments: serde_json::from_str(&departments_json).unwrap_or_default(),
            })
            .collect())
    }

    async fn todays_appointments(&self, phone: &str) -> anyhow::Result<Vec<Appointment>> {
        let phone = normalize_phone(phone);
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, patient_phone, doctor_id, scheduled_at, duration_minutes, status, notes, booked_via_call
             FROM appointments WHERE patient_phone = ?1 AND date(scheduled_at) = date('now')",
        )?;
        let rows = stmt
            .query_map(params![phone], row_to_appointment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn upsert_patient(&self, mut patient: Patient) -> anyhow::Result<Patient> {
        patient.phone = normalize_phone(&patient.phone);
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO patients (phone, name, national_id_last4, gender, insurance_company, insurance_id, language)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
               ON CONFLICT(phone) DO UPDATE SET
                 name = excluded.name,
                 national_id_last4 = excluded.national_id_last4,
                 gender = excluded.gender,
                 insurance_company = excluded.insurance_company,
                 insurance_id = excluded.insurance_id,
                 language = excluded.language"#,
            params![
                patient.phone,
                patient.name,
                patient.national_id_last4,
                patient.gender,
                patient.insurance_company,
                patient.insurance_id,
                patient.language,
            ],
        )?;
        Ok(patient)
    }

    async fn create_appointment(&self, mut appointment: Appointment) -> anyhow::Result<Appointment> {
        appointment.patient_phone = normalize_phone(&appointment.patient_phone);
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO appointments
               (id, patient_phone, doctor_id, scheduled_at, duration_minutes, status, notes, booked_via_call)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                appointment.id,
                appointment.patient_phone,
                appointment.doctor_id,
                appointment.scheduled_at.to_rfc3339(),
                appointment.duration_minutes,
                status_to_str(appointment.status),
                appointment.notes,
                appointment.booked_via_call as i32,
            ],
        )?;
        Ok(appointment)
    }

    async fn cancel_appointment(&self, id: &str, reason: Option<&str>) -> anyhow::Result<bool> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE appointments SET status = 'cancelled', notes = COALESCE(?2, notes) WHERE id = ?1 AND status != 'completed'",
            params![id, reason],
        )?;
        Ok(rows > 0)
    }

    async fn confirm_appointment(&self, id: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE appointments SET status = 'confirmed' WHERE id = ?1 AND status = 'pending'",
            params![id],
        )?;
        Ok(rows > 0)
    }
}

fn row_to_appointment(row: &rusqlite::Row) -> rusqlite::Result<Appointment> {
    let scheduled_at_str: String = row.get(3)?;
    let status_str: String = row.get(5)?;
    Ok(Appointment {
        id: row.get(0)?,
        patient_phone: row.get(1)?,
        doctor_id: row.get(2)?,
        scheduled_at: DateTime::parse_from_rfc3339(&scheduled_at_str)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        duration_minutes: row.get(4)?,
        status: str_to_status(&status_str),
        notes: row.get(6)?,
        booked_via_call: row.get::<_, i32>(7)? != 0,
    })
}

fn status_to_str(status: AppointmentStatus) -> &'static str {
    match status {
        AppointmentStatus::Pending => "pending",
        AppointmentStatus::Confirmed => "confirmed",
        AppointmentStatus::Cancelled => "cancelled",
        AppointmentStatus::Completed => "completed",
    }
}

fn str_to_status(s: &str) -> AppointmentStatus {
    match s {
        "confirmed" => AppointmentStatus::Confirmed,
        "cancelled" => AppointmentStatus::Cancelled,
        "completed" => AppointmentStatus::Completed,
        _ => AppointmentStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appointment(id: &str, phone: &str) -> Appointment {
        Appointment {
            id: id.to_string(),
            patient_phone: phone.to_string(),
            doctor_id: "doc-1".to_string(),
            scheduled_at: Utc::now(),
            duration_minutes: 30,
            status: AppointmentStatus::Pending,
            notes: None,
            booked_via_call: true,
        }
    }

    #[test]
    fn normalize_phone_rewrites_local_prefix() {
        assert_eq!(normalize_phone("0512345678"), "+966512345678");
        assert_eq!(normalize_phone("+966512345678"), "+966512345678");
    }

    #[test]
    fn normalize_phone_is_idempotent() {
        let once = normalize_phone("0512345678");
        let twice = normalize_phone(&once);
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn confirm_then_cancel_transitions_status() {
        let repo = InMemoryRepository::default();
        repo.create_appointment(appointment("a1", "0500000000")).await.unwrap();

        assert!(repo.confirm_appointment("a1").await.unwrap());
        assert!(repo.cancel_appointment("a1", Some("patient request")).await.unwrap());
        // confirming an already-cancelled appointment is a no-op
        assert!(!repo.confirm_appointment("a1").await.unwrap());
    }

    #[tokio::test]
    async fn todays_appointments_filters_by_normalized_phone() {
        let repo = InMemoryRepository::default();
        repo.create_appointment(appointment("a1", "0500000000")).await.unwrap();

        let found = repo.todays_appointments("+966500000000").await.unwrap();
        assert_eq!(found.len(), 1);
        let found_local_form = repo.todays_appointments("0500000000").await.unwrap();
        assert_eq!(found_local_form.len(), 1);
    }

    #[tokio::test]
    async fn sqlite_repository_round_trips_an_appointment() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SqliteRepository::new(dir.path().join("test.db")).await.unwrap();
        repo.create_appointment(appointment("a1", "0500000000")).await.unwrap();

        let found = repo.todays_appointments("+966500000000").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].status, AppointmentStatus::Pending);

        assert!(repo.confirm_appointment("a1").await.unwrap());
        let found = repo.todays_appointments("+966500000000").await.unwrap();
        assert_eq!(found[0].status, AppointmentStatus::Confirmed);
    }
}
