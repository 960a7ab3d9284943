//! Remote names of the trajectory device's control points.
//!
//! Every name is `{prefix}{suffix}`; per-axis names embed the 1-based slot
//! number, e.g. `BL11I-MO-DIFF-01:TRAJ1:M3TRAJ`.

/// Number of motion axis slots on a trajectory device.
pub const AXIS_SLOTS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrajectoryPvNames {
    prefix: String,
}

impl TrajectoryPvNames {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn pv(&self, suffix: &str) -> String {
        format!("{}{}", self.prefix, suffix)
    }

    fn axis_pv(&self, axis: usize, what: &str) -> String {
        format!("{}M{}{}", self.prefix, axis, what)
    }

    pub fn element_count(&self) -> String {
        self.pv("NELM")
    }
    pub fn pulse_count(&self) -> String {
        self.pv("NPULSES")
    }
    pub fn pulse_start(&self) -> String {
        self.pv("SPULSES")
    }
    pub fn pulse_stop(&self) -> String {
        self.pv("EPULSES")
    }
    pub fn actual_pulses(&self) -> String {
        self.pv("APULSES")
    }
    pub fn time(&self) -> String {
        self.pv("TIME")
    }
    pub fn abort(&self) -> String {
        self.pv("ABORT")
    }

    pub fn build(&self) -> String {
        self.pv("BUILD")
    }
    pub fn build_state(&self) -> String {
        self.pv("BSTATE")
    }
    pub fn build_status(&self) -> String {
        self.pv("BSTATUS")
    }
    pub fn build_message(&self) -> String {
        self.pv("BMESS")
    }

    pub fn execute(&self) -> String {
        self.pv("EXECUTE")
    }
    pub fn execute_state(&self) -> String {
        self.pv("ESTATE")
    }
    pub fn execute_status(&self) -> String {
        self.pv("ESTATUS")
    }
    pub fn execute_message(&self) -> String {
        self.pv("EMESS")
    }

    pub fn read(&self) -> String {
        self.pv("READ")
    }
    pub fn read_state(&self) -> String {
        self.pv("RSTATE")
    }
    pub fn read_status(&self) -> String {
        self.pv("RSTATUS")
    }
    pub fn read_message(&self) -> String {
        self.pv("RMESS")
    }

    pub fn axis_move(&self, axis: usize) -> String {
        self.axis_pv(axis, "MOVE")
    }
    pub fn axis_trajectory(&self, axis: usize) -> String {
        self.axis_pv(axis, "TRAJ")
    }
    pub fn axis_actual(&self, axis: usize) -> String {
        self.axis_pv(axis, "ACTUAL")
    }
    pub fn axis_name(&self, axis: usize) -> String {
        self.axis_pv(axis, "NAME")
    }
}
