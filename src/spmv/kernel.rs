//! Distributed product `u = A v` over a prepared schedule
//!
//! One product runs in three phases:
//!
//! 1. **Fan-out**: every owner sends the `v` components other processes need
//! 2. **Local product**: each process multiplies its ICRS block
//! 3. **Fan-in**: partial row sums go to the owners of `u`, which add them up

use crate::comm::{exchange_all, Communicator, Exchange};
use crate::error::{Result, SetupError};
use crate::matrix::Icrs;
use crate::spmv::schedule::CommSchedule;

/// Computes one distributed product
pub trait MultiplyKernel {
    /// Collective: every process must call it
    ///
    /// # Arguments
    ///
    /// * `matrix` - Local block
    /// * `schedule` - Schedule built for `matrix`
    /// * `v` - Local components of the input vector
    /// * `u` - Local components of the output vector, overwritten
    fn multiply<C: Communicator>(
        &self,
        comm: &C,
        matrix: &Icrs<f64>,
        schedule: &CommSchedule,
        v: &[f64],
        u: &mut [f64],
    ) -> Result<()>;
}

/// Fan-out, ICRS local product, fan-in
#[derive(Debug, Clone, Copy, Default)]
pub struct IcrsKernel;

impl MultiplyKernel for IcrsKernel {
    fn multiply<C: Communicator>(
        &self,
        comm: &C,
        matrix: &Icrs<f64>,
        schedule: &CommSchedule,
        v: &[f64],
        u: &mut [f64],
    ) -> Result<()> {
        let p = comm.size();
        if schedule.src_proc().len() != matrix.ncols() || schedule.dest_proc().len() != matrix.nrows() {
            return Err(SetupError::protocol(
                comm.rank(),
                format!(
                    "schedule covers {} rows and {} columns, block has {} and {}",
                    schedule.dest_proc().len(),
                    schedule.src_proc().len(),
                    matrix.nrows(),
                    matrix.ncols()
                ),
            ));
        }

        // Fan-out
        let mut fanout = Exchange::new(p);
        for (q, slots) in schedule.fanout_send().iter().enumerate() {
            for &slot in slots {
                let value = *v
                    .get(slot)
                    .ok_or_else(|| SetupError::protocol(comm.rank(), format!("v has no slot {}", slot)))?;
                fanout.push(q, value);
            }
        }
        let received = exchange_all(comm, fanout)?;

        let mut vloc = vec![0.0; matrix.ncols()];
        for (q, cols) in schedule.fanout_recv().iter().enumerate() {
            let values = received.from_source(q);
            if values.len() != cols.len() {
                return Err(SetupError::protocol(
                    comm.rank(),
                    format!("rank {} sent {} values, {} expected", q, values.len(), cols.len()),
                ));
            }
            for (&j, &value) in cols.iter().zip(values) {
                vloc[j] = value;
            }
        }

        let partial = matrix.local_product(&vloc);

        // Fan-in
        let mut fanin = Exchange::new(p);
        for (i, sum) in partial.into_iter().enumerate() {
            fanin.push(schedule.dest_proc()[i], (schedule.dest_index()[i], sum));
        }
        let contributions = exchange_all(comm, fanin)?.into_items();

        u.iter_mut().for_each(|x| *x = 0.0);
        for (slot, sum) in contributions {
            let target = u
                .get_mut(slot)
                .ok_or_else(|| SetupError::protocol(comm.rank(), format!("u has no slot {}", slot)))?;
            *target += sum;
        }

        Ok(())
    }
}
