//! clock.rs
//! Reloj inyectable. El cupo diario, el "ya se envió hoy" y la ventana de SMS
//! dependen de la hora local.

use chrono::{DateTime, Local, NaiveDate, Utc};

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Local>;

    fn now_utc(&self) -> DateTime<Utc> {
        self.now().with_timezone(&Utc)
    }

    /// Día calendario local
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

#[cfg(test)]
pub use fixed::FixedClock;

#[cfg(test)]
mod fixed {
    use std::sync::{Arc, Mutex};

    use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone};

    use super::Clock;

    /// Reloj fijo para pruebas; se comparte entre servicios y se puede mover.
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        now: Arc<Mutex<DateTime<Local>>>,
    }

    impl FixedClock {
        pub fn at(date: NaiveDate, hour: u32, minute: u32) -> Self {
            FixedClock {
                now: Arc::new(Mutex::new(local(date, hour, minute))),
            }
        }

        pub fn set(&self, date: NaiveDate, hour: u32, minute: u32) {
            *self.now.lock().expect("clock poisoned") = local(date, hour, minute);
        }

        pub fn advance(&self, by: Duration) {
            let mut now = self.now.lock().expect("clock poisoned");
            *now = *now + by;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Local> {
            *self.now.lock().expect("clock poisoned")
        }
    }

    fn local(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Local> {
        let naive = date
            .and_hms_opt(hour, minute, 0)
            .expect("hora inválida en test");
        Local
            .from_local_datetime(&naive)
            .earliest()
            .expect("hora local inexistente en test")
    }
}
