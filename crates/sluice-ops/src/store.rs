//! In-process schedule store with active-pointer semantics.
//!
//! Schedules live behind per-schedule `tokio` mutexes, so status transitions
//! and adaptation patches serialize per schedule while distinct schedules
//! proceed in parallel. The `(year, week) -> active schedule` pointer sits
//! under one `RwLock`; activating a schedule moves any other active schedule
//! for that week to `completed` and swaps the pointer atomically.
//!
//! Version updates compare-and-swap on the schedule's `version` so an
//! adaptation racing a stale snapshot fails with a state conflict instead of
//! silently overwriting.

use sluice_core::{
    IsoWeek, ScheduleId, ScheduleStatus, SluiceError, SluiceResult, WeeklySchedule,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

#[derive(Default)]
pub struct ScheduleStore {
    schedules: RwLock<HashMap<ScheduleId, Arc<Mutex<WeeklySchedule>>>>,
    active: RwLock<HashMap<IsoWeek, ScheduleId>>,
}

impl ScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schedule, returning its id.
    pub fn insert(&self, schedule: WeeklySchedule) -> ScheduleId {
        let id = schedule.id.clone();
        self.schedules
            .write()
            .expect("schedule map lock poisoned")
            .insert(id.clone(), Arc::new(Mutex::new(schedule)));
        id
    }

    fn handle(&self, id: &ScheduleId) -> SluiceResult<Arc<Mutex<WeeklySchedule>>> {
        self.schedules
            .read()
            .expect("schedule map lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| SluiceError::not_found("schedule", id.as_str()))
    }

    /// Snapshot of a schedule.
    pub async fn get(&self, id: &ScheduleId) -> SluiceResult<WeeklySchedule> {
        let handle = self.handle(id)?;
        let guard = handle.lock().await;
        Ok(guard.clone())
    }

    /// Run a closure under the schedule's mutex (single writer per
    /// schedule).
    pub async fn with_schedule<R>(
        &self,
        id: &ScheduleId,
        f: impl FnOnce(&mut WeeklySchedule) -> SluiceResult<R>,
    ) -> SluiceResult<R> {
        let handle = self.handle(id)?;
        let mut guard = handle.lock().await;
        f(&mut guard)
    }

    /// Compare-and-swap version bump: fails when the caller's snapshot is
    /// stale.
    pub async fn bump_version(&self, id: &ScheduleId, expected: u32) -> SluiceResult<u32> {
        self.with_schedule(id, |schedule| {
            if schedule.version != expected {
                return Err(SluiceError::state_conflict(
                    "schedule version",
                    schedule.version,
                    expected + 1,
                ));
            }
            schedule.bump_version();
            Ok(schedule.version)
        })
        .await
    }

    pub async fn approve(&self, id: &ScheduleId) -> SluiceResult<()> {
        self.with_schedule(id, |schedule| schedule.transition_to(ScheduleStatus::Approved))
            .await
    }

    /// Activate an approved schedule. Any other active schedule for the same
    /// week completes; re-activating the current active schedule is a no-op.
    pub async fn activate(&self, id: &ScheduleId) -> SluiceResult<()> {
        let handle = self.handle(id)?;
        let week = {
            let guard = handle.lock().await;
            if guard.status == ScheduleStatus::Active {
                // Idempotent re-activation.
                return Ok(());
            }
            if guard.status != ScheduleStatus::Approved {
                return Err(SluiceError::state_conflict(
                    "schedule",
                    guard.status,
                    ScheduleStatus::Active,
                ));
            }
            guard.week
        };

        // Retire the currently active schedule for the week, if any.
        let previous = {
            let active = self.active.read().expect("active pointer lock poisoned");
            active.get(&week).cloned()
        };
        if let Some(previous_id) = previous {
            if previous_id != *id {
                let previous_handle = self.handle(&previous_id)?;
                let mut guard = previous_handle.lock().await;
                if guard.status == ScheduleStatus::Active {
                    guard.transition_to(ScheduleStatus::Completed)?;
                }
            }
        }

        {
            let mut guard = handle.lock().await;
            guard.transition_to(ScheduleStatus::Active)?;
        }
        self.active
            .write()
            .expect("active pointer lock poisoned")
            .insert(week, id.clone());
        Ok(())
    }

    /// Copy a schedule into a fresh draft for the same week (next sequence
    /// number). Operations reset to `scheduled`, version restarts at 1.
    pub async fn clone_schedule(&self, id: &ScheduleId, sequence: u32) -> SluiceResult<ScheduleId> {
        let source = self.get(id).await?;
        let mut draft = WeeklySchedule::new(source.week, sequence);
        draft.metrics = source.metrics.clone();
        draft.field_days = source.field_days.clone();
        draft.instructions = source.instructions.clone();
        for op in source.operations() {
            let mut copy = op.clone();
            copy.status = sluice_core::OperationStatus::Scheduled;
            copy.actual = None;
            draft.push_operation(copy);
        }
        Ok(self.insert(draft))
    }

    /// Remove a schedule. The active schedule for a week cannot be deleted;
    /// deactivate it by activating a replacement first.
    pub async fn delete(&self, id: &ScheduleId) -> SluiceResult<()> {
        let snapshot = self.get(id).await?;
        if snapshot.status == ScheduleStatus::Active {
            return Err(SluiceError::state_conflict(
                "schedule",
                ScheduleStatus::Active,
                "deleted",
            ));
        }
        self.schedules
            .write()
            .expect("schedule map lock poisoned")
            .remove(id);
        Ok(())
    }

    /// The active schedule id for a week, if any.
    pub fn active_for(&self, week: IsoWeek) -> Option<ScheduleId> {
        self.active
            .read()
            .expect("active pointer lock poisoned")
            .get(&week)
            .cloned()
    }

    /// Ids of every stored schedule (unordered).
    pub fn ids(&self) -> Vec<ScheduleId> {
        self.schedules
            .read()
            .expect("schedule map lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}
