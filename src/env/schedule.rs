use crate::exception::traps::Trapframe;

use super::{EnvManager, EnvStatus, NENV};

impl EnvManager {
    /// One full circular scan of the pool starting after the cursor. The
    /// cursor moves to the slot returned.
    pub fn pick_next(&mut self) -> Option<usize> {
        for step in 1..=NENV {
            let ind = (self.cursor + step) % NENV;
            if self.envs[ind].env_status == EnvStatus::Runnable {
                self.cursor = ind;
                return Some(ind);
            }
        }
        None
    }

    /// Round robin: dispatch the next runnable environment into `tf`.
    /// With nothing runnable this spins forever re-scanning.
    pub fn schedule(&mut self, tf: &mut Trapframe) {
        loop {
            if let Some(ind) = self.pick_next() {
                self.env_run(ind, tf);
                return;
            }
            core::hint::spin_loop();
        }
    }

    /// Context switch. `tf` is the live save area filled by the trap entry:
    /// it is captured into the outgoing environment before the incoming
    /// address space is installed and its saved context copied back.
    pub fn env_run(&mut self, ind: usize, tf: &mut Trapframe) {
        assert!(
            self.envs[ind].env_status == EnvStatus::Runnable,
            "running an env that is not runnable"
        );
        if let Some(cur) = self.cur_env_ind {
            self.envs[cur].env_tf = *tf;
        }

        self.cur_env_ind = Some(ind);
        let curenv = &mut self.envs[ind];
        curenv.env_runs += 1;
        if let Some(pgdir) = curenv.env_pgdir {
            self.context = Some((pgdir, curenv.env_id.asid()));
        }
        *tf = curenv.env_tf;
        log::trace!("run env {:08x} at {:#x}", curenv.env_id, curenv.env_tf.cp0_epc);
    }
}
