#[cfg(test)]
pub(crate) mod tests {
    use std::error::Error;
    use std::fmt::Debug;

    use approx::{assert_abs_diff_eq, AbsDiffEq};
    use candle_core::{Device, Tensor, WithDType};
    use ndarray::{ArrayBase, ArrayD, DataOwned, Dimension};
    use rand_core::RngCore;
    use rand_pcg::Pcg32;
    use snafu::{ResultExt, Whatever};

    // Like TryInto, but we need our own trait so that we can implement it
    // for external types.
    pub trait IntoArrayD<T> {
        fn into_arrayd(self) -> Result<ArrayD<T>, Box<dyn Error>>;
    }

    impl<T> IntoArrayD<T> for Tensor
    where
        T: WithDType,
    {
        fn into_arrayd(self) -> Result<ArrayD<T>, Box<dyn Error>> {
            (&self).into_arrayd()
        }
    }

    impl<T> IntoArrayD<T> for &Tensor
    where
        T: WithDType,
    {
        fn into_arrayd(self) -> Result<ArrayD<T>, Box<dyn Error>> {
            let data = self.contiguous()?.reshape(((),))?.to_vec1()?;
            Ok(ArrayD::from_shape_vec(self.shape().dims(), data)?)
        }
    }

    impl<S, D, T> IntoArrayD<T> for ArrayBase<S, D>
    where
        D: Dimension,
        S: DataOwned<Elem = T>,
        T: Clone,
    {
        fn into_arrayd(self) -> Result<ArrayD<T>, Box<dyn Error>> {
            Ok(self.to_owned().into_dyn())
        }
    }

    pub(crate) fn assert_tensor_eq<T>(a: impl IntoArrayD<T>, b: impl IntoArrayD<T>, epsilon: T)
    where
        T: AbsDiffEq<Epsilon = T> + Clone + Debug,
    {
        let a = a.into_arrayd().expect("Cannot convert array");
        let b = b.into_arrayd().expect("Cannot convert array");

        assert_eq!(
            a.shape(),
            b.shape(),
            "Shape mismatch: {:?}, {:?}",
            a.shape(),
            b.shape()
        );

        assert_abs_diff_eq!(a, b, epsilon = epsilon);
    }

    /// Generate vectors with a PRNG.
    pub(crate) trait PseudoRandom {
        /// Generate a vector with a PRNG.
        ///
        /// This method generates a vector with the given length. The seed of
        /// the PRNG is set to the given length, so test inputs do not change
        /// between runs.
        ///
        /// * `len` - The length of the vector to generate.
        /// * `device` - The device to allocate the tensor on.
        fn pseudo_random(len: usize, device: &Device) -> Self;
    }

    impl PseudoRandom for Tensor {
        fn pseudo_random(len: usize, device: &Device) -> Self {
            let mut rng = Pcg32::new(len as u64, 0);
            let iter = (0..len).map(|_| {
                let next = rng.next_u32();

                // Generate a uniform random number in [-1, 1). We don't use
                // rand's uniform sampler, so that test vectors don't get
                // invalidated by changes in the rand crate.
                let mantissa_bits_shift = u32::BITS - f32::MANTISSA_DIGITS;
                let zero_one =
                    (next >> mantissa_bits_shift) as f32 / (1 << f32::MANTISSA_DIGITS) as f32;

                // We have not used the least significant bit while generating
                // the random number, so we can use it to pick the sign.
                let sign = (next & 1) as f32;
                zero_one - sign
            });
            Tensor::from_iter(iter, device).expect("Cannot allocate random tensor")
        }
    }

    /// Sample sequence-to-sequence inputs used for most tests.
    pub fn sample_seq2seq_inputs() -> Result<(Tensor, Tensor), Whatever> {
        let source_ids = Tensor::new(&[[1u32, 2, 3, 0]], &Device::Cpu)
            .whatever_context("Cannot create source tensor")?;

        let target_ids = Tensor::new(&[[1u32, 2, 0, 0]], &Device::Cpu)
            .whatever_context("Cannot create target tensor")?;

        Ok((source_ids, target_ids))
    }
}
